//! Deriving data-source schemas from resource schemas.
//!
//! A data source that looks up an existing resource exposes the same
//! attributes as the resource, all read-only. Lookup keys are then
//! re-promoted with [`add_optional_fields`].

use crate::schema::{Attribute, AttributeFlags, Block, NestedBlock, Schema};

/// Derive a read-only schema from a resource schema.
///
/// Every attribute becomes computed; required, optional and force-new are
/// cleared; validators, defaults and diff suppressors are dropped. Nested
/// blocks are transformed recursively, become computed and lose their item
/// bounds. Attribute types, collection element types included, are kept.
/// Deriving twice gives the same result as deriving once.
pub fn datasource_schema_from_resource_schema(resource: &Schema) -> Schema {
    Schema {
        version: resource.version,
        block: computed_block(&resource.block),
    }
}

fn computed_block(block: &Block) -> Block {
    Block {
        attributes: block
            .attributes
            .iter()
            .map(|(name, attr)| (name.clone(), computed_attribute(attr)))
            .collect(),
        blocks: block
            .blocks
            .iter()
            .map(|(name, nested)| {
                let derived = NestedBlock {
                    block: computed_block(&nested.block),
                    nesting_mode: nested.nesting_mode,
                    min_items: 0,
                    max_items: 0,
                    computed: true,
                };
                (name.clone(), derived)
            })
            .collect(),
        description: block.description.clone(),
    }
}

fn computed_attribute(attr: &Attribute) -> Attribute {
    Attribute {
        attr_type: attr.attr_type.clone(),
        flags: AttributeFlags {
            sensitive: attr.flags.sensitive,
            ..AttributeFlags::computed()
        },
        description: attr.description.clone(),
        force_new: false,
        default: None,
        validator: None,
        diff_suppress: None,
    }
}

/// Make the named root attributes optional and computed, so they can be
/// used as lookup filters. Unknown names are ignored.
pub fn add_optional_fields(schema: &mut Schema, names: &[&str]) {
    for name in names {
        if let Some(attr) = schema.block.attributes.get_mut(*name) {
            attr.flags.optional = true;
            attr.flags.computed = true;
            attr.flags.required = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffSuppress;
    use crate::schema::{AttributeType, BlockNestingMode};
    use crate::validators::Validator;
    use proptest::prelude::*;
    use serde_json::json;

    fn volume_schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::required_string().with_validator(Validator::Email))
            .with_attribute(
                "zone",
                Attribute::optional_computed_string()
                    .with_force_new()
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute("tags", Attribute::optional_string_list())
            .with_attribute("perf_iops", Attribute::optional_int64().with_default(json!(5000)))
            .with_attribute("secret", Attribute::optional_string().sensitive())
            .with_block(
                "snapshot",
                NestedBlock::single(
                    Block::new().with_attribute("id", Attribute::required_string().with_force_new()),
                )
                .with_min_items(1),
            )
    }

    fn assert_all_computed(block: &Block) {
        for attr in block.attributes.values() {
            assert!(attr.flags.computed);
            assert!(!attr.flags.required && !attr.flags.optional && !attr.force_new);
            assert!(attr.validator.is_none() && attr.default.is_none() && attr.diff_suppress.is_none());
        }
        for nested in block.blocks.values() {
            assert!(nested.computed);
            assert_eq!((nested.min_items, nested.max_items), (0, 0));
            assert_all_computed(&nested.block);
        }
    }

    #[test]
    fn test_derived_schema_is_read_only() {
        let derived = datasource_schema_from_resource_schema(&volume_schema());
        assert_all_computed(&derived.block);
        assert_eq!(
            derived.attribute("tags").unwrap().attr_type,
            AttributeType::list(AttributeType::String)
        );
        assert!(derived.attribute("secret").unwrap().flags.sensitive);
        assert_eq!(derived.block.blocks["snapshot"].nesting_mode, BlockNestingMode::Single);
    }

    #[test]
    fn test_add_optional_fields() {
        let mut derived = datasource_schema_from_resource_schema(&volume_schema());
        add_optional_fields(&mut derived, &["name", "zone", "unknown"]);

        let name = derived.attribute("name").unwrap();
        assert!(name.flags.optional && name.flags.computed && !name.flags.required);
        assert!(!derived.attribute("tags").unwrap().flags.optional);
        assert!(derived.attribute("unknown").is_none());
    }

    #[test]
    fn test_derivation_idempotent() {
        let once = datasource_schema_from_resource_schema(&volume_schema());
        let twice = datasource_schema_from_resource_schema(&once);
        assert_eq!(once, twice);
    }

    fn arb_attribute() -> impl Strategy<Value = Attribute> {
        (
            prop_oneof![
                Just(AttributeType::String),
                Just(AttributeType::Int64),
                Just(AttributeType::Bool),
                Just(AttributeType::list(AttributeType::String)),
                Just(AttributeType::map(AttributeType::Int64)),
            ],
            any::<(bool, bool, bool, bool)>(),
        )
            .prop_map(|(attr_type, (required, computed, sensitive, force_new))| {
                let flags = AttributeFlags {
                    required,
                    optional: !required,
                    computed,
                    sensitive,
                };
                let attr = Attribute::new(attr_type, flags).with_validator(Validator::Uuid);
                if force_new {
                    attr.with_force_new()
                } else {
                    attr
                }
            })
    }

    fn arb_schema() -> impl Strategy<Value = Schema> {
        (
            prop::collection::hash_map("[a-z]{1,8}", arb_attribute(), 0..6),
            prop::collection::hash_map("[a-z]{1,8}", arb_attribute(), 0..3),
        )
            .prop_map(|(root, nested)| {
                let mut schema = Schema::v0();
                schema.block.attributes = root;
                let mut block = Block::new();
                block.attributes = nested;
                schema.with_block("inner", NestedBlock::list(block).with_max_items(3))
            })
    }

    proptest! {
        #[test]
        fn prop_derivation_all_computed_and_idempotent(schema in arb_schema()) {
            let once = datasource_schema_from_resource_schema(&schema);
            assert_all_computed(&once.block);
            prop_assert_eq!(datasource_schema_from_resource_schema(&once), once.clone());
            for (name, attr) in &schema.block.attributes {
                prop_assert_eq!(&once.block.attributes[name].attr_type, &attr.attr_type);
            }
        }
    }
}
