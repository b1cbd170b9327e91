use super::*;
use crate::encode::ResourceIds;
use crate::table::split_resource_id;
use crate::value::{EmptyStore, EntryStore, ValueType};

#[test]
fn encoded_table_survives_a_binary_round_trip() {
    let (context, mut table) = encoded_table();
    let bytes = table.to_binary();

    let mut reread = TableBlock::from_bytes(&bytes).unwrap();
    assert_eq!(reread.to_binary(), bytes);

    let title = context.local_id(&table, "string", "title").unwrap();
    let german = ResConfig::parse_qualifiers("de").unwrap();
    let item = reread.value(title, &german).unwrap();
    assert_eq!(item.text.as_deref(), Some("Hallo Welt"));
    assert_eq!(item.spans, vec![("i".to_string(), 6, 9)]);
    let item = reread.value(title, &ResConfig::default()).unwrap();
    assert_eq!(item.text.as_deref(), Some("Hello World"));

    let group = reread.entry_group(title).unwrap();
    assert_eq!(group.configs().len(), 2);
}

#[test]
fn reference_counts_match_holders() {
    let (_, mut table) = encoded_table();
    assert_table_counts(&mut table);

    let bytes = table.to_binary();
    let mut reread = TableBlock::from_bytes(&bytes).unwrap();
    assert_table_counts(&mut reread);
}

#[test]
fn removed_entry_strings_go_on_compaction() {
    let (context, mut table) = encoded_table();
    let title = context.local_id(&table, "string", "title").unwrap();
    let app_name = context.local_id(&table, "string", "app_name").unwrap();
    let german = ResConfig::parse_qualifiers("de").unwrap();

    assert!(table.remove_entry(title, &german));
    let remap = table.remove_unused_strings();
    assert!(!remap.is_identity());
    assert!(table.pool().index_of("Hallo Welt").is_none());
    assert_table_counts(&mut table);

    assert_eq!(
        table.value(app_name, &german).and_then(|item| item.text),
        Some("Demo".to_string())
    );
    assert_eq!(
        table.value(title, &ResConfig::default()).and_then(|item| item.text),
        Some("Hello World".to_string())
    );
}

#[test]
fn flag_values_decode_to_the_fewest_names() {
    let (context, table) = encoded_table();
    let gravity = context.local_id(&table, "attr", "gravity").unwrap();
    let attribute = table.attribute_bag(gravity).unwrap();
    assert!(attribute.is_flag());
    assert_eq!(attribute.decode_value_text(0x7).as_deref(), Some("vertical|left"));
    assert_eq!(attribute.decode_value_text(0x3).as_deref(), Some("vertical"));
    assert_eq!(attribute.decode_value_text(0x8), None);

    let xml = table
        .decode_values_xml(0x7f, &ResConfig::default(), &EmptyStore)
        .unwrap();
    assert!(xml.contains("<item name=\"gravity\">vertical|left</item>"));
}

#[test]
fn sixteen_dp_renders_back() {
    let (context, table) = encoded_table();
    let margin = context.local_id(&table, "dimen", "margin").unwrap();
    let item = table.value(margin, &ResConfig::default()).unwrap();
    assert_eq!(item.value_type, ValueType::Dimension);
    assert_eq!(item.data, 0x0000_1001);
    let xml = table
        .decode_values_xml(0x7f, &ResConfig::default(), &EmptyStore)
        .unwrap();
    assert!(xml.contains("<dimen name=\"margin\">16.0dp</dimen>"));
}

#[test]
fn public_ids_are_kept_and_flagged() {
    let public = ResourceIds::from_xml(
        r#"<resources>
    <public type="string" name="app_name" id="0x7f050002"/>
    <public type="dimen" name="margin" id="0x7f060000"/>
</resources>"#,
    )
    .unwrap();
    let mut context = EncodeContext::with_public_ids("com.example", public).unwrap();
    let mut table = TableBlock::new();
    ValuesEncoder::new(&mut context, ResConfig::default())
        .encode_str(&mut table, VALUES)
        .unwrap();

    assert_eq!(context.local_id(&table, "string", "app_name"), Some(0x7f050002));
    let title = context.local_id(&table, "string", "title").unwrap();
    assert_eq!(split_resource_id(title).0, 0x7f);
    assert_eq!(split_resource_id(title).1, 0x05);
    assert!(split_resource_id(title).2 > 2);

    let package = table.package(0x7f).unwrap();
    assert_eq!(package.type_name(0x05), Some("string"));
    let spec = package.pair(0x05).unwrap().spec();
    assert!(spec.is_public(2));
    assert!(!spec.is_public(split_resource_id(title).2));
    assert!(package.pair(0x06).unwrap().spec().is_public(0));
}

#[test]
fn tables_merge_package_by_package() {
    let (context, table) = encoded_table();
    let mut merged = TableBlock::new();
    merged.merge(&table).unwrap();
    let app_name = context.local_id(&table, "string", "app_name").unwrap();
    assert_eq!(
        merged.value(app_name, &ResConfig::default()).and_then(|item| item.text),
        Some("Demo".to_string())
    );
    assert_eq!(
        merged.resource_name(app_name).map(|name| name.name),
        Some("app_name".to_string())
    );
    assert_table_counts(&mut merged);
}
