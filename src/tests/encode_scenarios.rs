use super::*;
use crate::encode::XmlEncoder;
use crate::table::FrameworkTable;
use crate::value::{EmptyStore, EntryStore, StoreChain, ValueType};
use crate::xml::{ResXmlDocument, XmlDocument};

const FRAMEWORK_VALUES: &str = r#"<resources>
    <attr name="versionCode" format="integer"/>
    <attr name="label" format="reference|string"/>
    <attr name="screenOrientation">
        <enum name="unspecified" value="-1"/>
        <enum name="portrait" value="1"/>
    </attr>
    <attr name="configChanges">
        <flag name="locale" value="0x0004"/>
        <flag name="orientation" value="0x0080"/>
    </attr>
</resources>"#;

const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    package="com.example"
    android:versionCode="7">
    <application android:label="@string/app_name">
        <activity android:screenOrientation="portrait"
            android:configChanges="locale|orientation"/>
    </application>
</manifest>"#;

fn framework() -> FrameworkTable {
    let mut context = EncodeContext::new(0x01, "android");
    let mut table = TableBlock::new();
    ValuesEncoder::new(&mut context, ResConfig::default())
        .encode_str(&mut table, FRAMEWORK_VALUES)
        .unwrap();
    let mut framework = FrameworkTable::new(table);
    framework.optimize("android", "33");
    framework
}

#[test]
fn decoded_values_encode_to_the_same_document() {
    let (_, table) = encoded_table();
    let first = table
        .decode_values_xml(0x7f, &ResConfig::default(), &EmptyStore)
        .unwrap();

    let mut context = EncodeContext::new(0x7f, "com.example");
    let mut again = TableBlock::new();
    ValuesEncoder::new(&mut context, ResConfig::default())
        .encode_str(&mut again, &first)
        .unwrap();
    let second = again
        .decode_values_xml(0x7f, &ResConfig::default(), &EmptyStore)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn manifest_compiles_against_framework_and_app_table() {
    let framework = framework();
    assert_eq!(framework.framework_name().as_deref(), Some("android"));
    let (mut context, mut table) = encoded_table();
    context.add_framework(&framework);

    let mut document = XmlEncoder::new(&mut context)
        .encode_str(&mut table, MANIFEST)
        .unwrap();
    let bytes = document.to_binary();
    let mut reread = ResXmlDocument::from_bytes(&bytes).unwrap();
    assert_eq!(reread.to_binary(), bytes);

    let version_code = framework.resolve_resource_id("attr", "versionCode").unwrap();
    let root = reread.root().unwrap();
    let version = root
        .attribute_by_id(reread.resource_map(), version_code)
        .unwrap();
    assert_eq!(version.value().value_type(), ValueType::IntDec);
    assert_eq!(version.value().data(), 7);

    let package = root.attribute(reread.pool(), None, "package").unwrap();
    assert!(package.value().is_string());

    let store = StoreChain::new(vec![&table as &dyn EntryStore, &framework as &dyn EntryStore]);
    let xml = reread.decode_to_xml(&store, 0x7f).unwrap();
    let decoded = XmlDocument::from_string(&xml).unwrap();
    let application = decoded.root.find_child("application").unwrap();
    assert_eq!(application.attribute("android:label"), Some("@string/app_name"));
    let activity = application.find_child("activity").unwrap();
    assert_eq!(activity.attribute("android:screenOrientation"), Some("portrait"));
    assert_eq!(
        activity.attribute("android:configChanges"),
        Some("orientation|locale")
    );
}

#[test]
fn document_reference_counts_match_holders() {
    let framework = framework();
    let (mut context, mut table) = encoded_table();
    context.add_framework(&framework);
    let document = XmlEncoder::new(&mut context)
        .encode_str(&mut table, MANIFEST)
        .unwrap();
    let mut reread = {
        let mut document = document;
        ResXmlDocument::from_bytes(&document.to_binary()).unwrap()
    };
    let (pool, root) = reread.split_mut();
    let len = pool.len();
    let counts = holder_counts(len, |visit| {
        if let Some(root) = root {
            root.visit_string_refs(visit);
        }
    });
    assert_counts_match(pool, &counts);
}

#[test]
fn unknown_reference_in_a_layout_is_reported() {
    let (mut context, mut table) = encoded_table();
    let result = XmlEncoder::new(&mut context).encode_str(
        &mut table,
        r#"<View xmlns:android="http://schemas.android.com/apk/res/android"
    android:background="@drawable/missing"/>"#,
    );
    assert!(matches!(
        result,
        Err(crate::block::error::ArscError::UnresolvedReference(_))
    ));
}
