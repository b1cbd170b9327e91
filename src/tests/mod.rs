mod encode_scenarios;
mod table_scenarios;

use crate::encode::{EncodeContext, ValuesEncoder};
use crate::pool::{StringHolder, StringPool, StringRef};
use crate::table::{ResConfig, TableBlock};

pub(crate) const VALUES: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<resources>
    <string name="app_name">Demo</string>
    <string name="title">Hello <b>World</b></string>
    <string name="alias">@string/app_name</string>
    <dimen name="margin">16dp</dimen>
    <integer name="retries">3</integer>
    <bool name="enabled">false</bool>
    <color name="accent">#80ff0000</color>
    <item type="id" name="toolbar"/>
    <string-array name="sizes">
        <item>small</item>
        <item>large</item>
    </string-array>
    <plurals name="songs">
        <item quantity="one">One song</item>
        <item quantity="other">%d songs</item>
    </plurals>
    <attr name="gravity">
        <flag name="top" value="0x1"/>
        <flag name="bottom" value="0x2"/>
        <flag name="vertical" value="0x3"/>
        <flag name="left" value="0x4"/>
    </attr>
    <style name="Card">
        <item name="gravity">top|bottom|left</item>
    </style>
</resources>"#;

pub(crate) const VALUES_DE: &str = r#"<resources>
    <string name="title">Hallo <i>Welt</i></string>
    <string name="app_name">Demo</string>
</resources>"#;

/// A table holding `VALUES` under the default configuration and `VALUES_DE`
/// under `de`.
pub(crate) fn encoded_table<'a>() -> (EncodeContext<'a>, TableBlock) {
    let mut context = EncodeContext::new(0x7f, "com.example");
    let mut table = TableBlock::new();
    ValuesEncoder::new(&mut context, ResConfig::default())
        .encode_str(&mut table, VALUES)
        .unwrap();
    ValuesEncoder::for_qualifiers(&mut context, "de")
        .unwrap()
        .encode_str(&mut table, VALUES_DE)
        .unwrap();
    (context, table)
}

/// Holders per pool index found by `walk`.
pub(crate) fn holder_counts(
    len: usize,
    walk: impl FnOnce(&mut dyn FnMut(&mut StringRef)),
) -> Vec<usize> {
    let mut counts = vec![0usize; len];
    walk(&mut |string_ref: &mut StringRef| {
        if !string_ref.is_none() {
            counts[string_ref.index() as usize] += 1;
        }
    });
    counts
}

pub(crate) fn assert_counts_match(pool: &StringPool, counts: &[usize]) {
    for (index, count) in counts.iter().enumerate() {
        let entry = pool.entry(index as u32).unwrap();
        assert_eq!(
            entry.reference_count(),
            *count,
            "string {} ({:?})",
            index,
            pool.get(index as u32)
        );
    }
}

pub(crate) fn assert_table_counts(table: &mut TableBlock) {
    let (pool, packages) = table.split_mut();
    let len = pool.len();
    let counts = holder_counts(len, |visit| {
        pool.visit_string_refs(&mut *visit);
        for package in packages.iter_mut() {
            package.visit_table_refs(&mut *visit);
        }
    });
    assert_counts_match(pool, &counts);
}
