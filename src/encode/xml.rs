use std::collections::HashMap;

use log::{debug, warn};

use crate::block::error::ArscResult;
use crate::encode::{parse, EncodeContext};
use crate::pool::StringPool;
use crate::table::TableBlock;
use crate::value::ValueItem;
use crate::xml::{
    ResXmlDocument, ResXmlElement, XmlAttribute, XmlContent, XmlDocument, XmlElement,
    ANDROID_NAMESPACE, AUTO_NAMESPACE,
};

/// Namespace prefix of the per-package attribute namespace.
const PACKAGE_NAMESPACE_PREFIX: &str = "http://schemas.android.com/apk/res/";

/// `(namespace uri, attribute name)` → `(pool index, resource id)`.
type MappedNames = HashMap<(Option<String>, String), (u32, u32)>;

/// Compiles textual XML documents (manifests, layouts, drawables) into
/// binary XML. Attributes in the android namespace get their ids from the
/// frameworks, res-auto and package namespaces from the package being built.
pub struct XmlEncoder<'c, 'a> {
    context: &'c mut EncodeContext<'a>,
}

impl<'c, 'a> XmlEncoder<'c, 'a> {
    pub fn new(context: &'c mut EncodeContext<'a>) -> Self {
        XmlEncoder { context }
    }

    pub fn encode_str(&mut self, table: &mut TableBlock, xml: &str) -> ArscResult<ResXmlDocument> {
        self.encode(table, &XmlDocument::from_string(xml)?)
    }

    pub fn encode(&mut self, table: &mut TableBlock, document: &XmlDocument) -> ArscResult<ResXmlDocument> {
        let mut binary = ResXmlDocument::new();
        let mut mapped = MappedNames::new();
        self.map_attribute_names(table, &mut binary, &document.root, &mut mapped);
        debug!("{} resource-mapped attribute names", mapped.len());

        binary.create_root_element(&document.root.name);
        let (pool, root) = binary.split_mut();
        if let Some(root) = root {
            self.fill_element(table, pool, &mapped, root, &document.root)?;
        }
        if self.context.options.compact_strings {
            binary.remove_unused_strings();
        }
        Ok(binary)
    }

    /// Registers every attribute name that has a resource id, so the
    /// resource-mapped prefix of the pool is complete before the tree is
    /// built.
    fn map_attribute_names(
        &mut self,
        table: &TableBlock,
        binary: &mut ResXmlDocument,
        element: &XmlElement,
        mapped: &mut MappedNames,
    ) {
        for attribute in &element.attributes {
            let key = (attribute.namespace_uri.clone(), attribute.name.clone());
            if mapped.contains_key(&key) {
                continue;
            }
            if let Some(resource_id) = self.attribute_id(table, attribute) {
                let index = binary.get_or_create_attribute_name(&attribute.name, resource_id);
                mapped.insert(key, (index, resource_id));
            }
        }
        for child in element.child_elements() {
            self.map_attribute_names(table, binary, child, mapped);
        }
    }

    fn attribute_id(&self, table: &TableBlock, attribute: &XmlAttribute) -> Option<u32> {
        let uri = attribute.namespace_uri.as_deref()?;
        let resource_id = if uri == ANDROID_NAMESPACE {
            self.context
                .frameworks()
                .iter()
                .find_map(|framework| framework.resolve_resource_id("attr", &attribute.name))
        } else if uri == AUTO_NAMESPACE
            || uri.strip_prefix(PACKAGE_NAMESPACE_PREFIX) == Some(self.context.package_name())
        {
            self.context.local_id(table, "attr", &attribute.name)
        } else {
            None
        };
        if resource_id.is_none() {
            warn!("no attribute id for {}", attribute.qualified_name());
        }
        resource_id
    }

    fn fill_element(
        &mut self,
        table: &mut TableBlock,
        pool: &mut StringPool,
        mapped: &MappedNames,
        binary: &mut ResXmlElement,
        element: &XmlElement,
    ) -> ArscResult<()> {
        binary.set_name(pool, element.namespace_uri.as_deref(), &element.name);
        binary.set_line(element.line);
        for (prefix, uri) in &element.namespaces {
            binary.add_namespace(pool, prefix, uri);
        }
        for attribute in &element.attributes {
            let namespace_uri = attribute.namespace_uri.as_deref();
            let key = (attribute.namespace_uri.clone(), attribute.name.clone());
            let (name_index, resource_id) = match mapped.get(&key) {
                Some(&(index, resource_id)) => (index, resource_id),
                None => (pool.get_or_create(&attribute.name), 0),
            };
            let value = self.attribute_value(table, resource_id, &attribute.value)?;
            let stored = binary.set_attribute(pool, namespace_uri, name_index, &value);
            if self.context.options.keep_raw_values && !value.is_string() {
                stored.set_raw_text(pool, Some(&attribute.value));
            }
        }
        for child in &element.children {
            match child {
                XmlContent::Element(child) => {
                    let created = binary.create_child(pool, child.namespace_uri.as_deref(), &child.name);
                    self.fill_element(table, pool, mapped, created, child)?;
                }
                XmlContent::Text(text) => binary.add_text(pool, text),
            }
        }
        Ok(())
    }

    /// Attributes without a resource id keep their text unless it is a
    /// reference.
    fn attribute_value(&mut self, table: &mut TableBlock, resource_id: u32, text: &str) -> ArscResult<ValueItem> {
        if resource_id != 0 {
            return self.context.encode_attribute_value(table, resource_id, text);
        }
        if parse::is_reference(text) {
            return self.context.resolve_reference(table, text.trim());
        }
        Ok(ValueItem::string(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::ValuesEncoder;
    use crate::table::{FrameworkTable, ResConfig};
    use crate::value::{EntryStore, ValueType};

    /// A tiny framework package with `orientation` (enum) and `text`.
    fn framework() -> FrameworkTable {
        let mut context = EncodeContext::new(0x01, "android");
        let mut table = TableBlock::new();
        ValuesEncoder::new(&mut context, ResConfig::default())
            .encode_str(
                &mut table,
                r#"<resources>
    <attr name="orientation">
        <enum name="horizontal" value="0"/>
        <enum name="vertical" value="1"/>
    </attr>
    <attr name="text" format="string"/>
    <attr name="layout_width" format="dimension">
        <enum name="match_parent" value="-1"/>
        <enum name="wrap_content" value="-2"/>
    </attr>
</resources>"#,
            )
            .unwrap();
        FrameworkTable::new(table)
    }

    const LAYOUT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<LinearLayout xmlns:android="http://schemas.android.com/apk/res/android"
    android:orientation="vertical"
    android:layout_width="match_parent"
    tools="ignored">
    <TextView android:id="@+id/title" android:text="Hello" android:layout_width="12dp"/>
</LinearLayout>"#;

    #[test]
    fn layout_attributes_are_typed_and_mapped() {
        let framework = framework();
        let orientation = framework.resolve_resource_id("attr", "orientation").unwrap();
        let mut context = EncodeContext::new(0x7f, "com.example");
        context.add_framework(&framework);
        let mut table = TableBlock::new();
        let mut document = XmlEncoder::new(&mut context)
            .encode_str(&mut table, LAYOUT)
            .unwrap();

        assert_eq!(document.resource_map().len(), 3);
        assert_eq!(document.pool().get(0), Some("orientation"));

        let root = document.root().unwrap();
        let attribute = root.attribute_by_id(document.resource_map(), orientation).unwrap();
        assert_eq!(attribute.value().value_type(), ValueType::IntDec);
        assert_eq!(attribute.value().data(), 1);

        let width = root.attributes()[1].value();
        assert_eq!(width.data(), 0xFFFF_FFFF);

        let text_view = root.child_elements().next().unwrap();
        let id = text_view.attributes().iter().find(|attribute| {
            attribute.value().value_type() == ValueType::Reference
        });
        let id = id.unwrap().value().data();
        assert_eq!(table.resource_name(id).map(|name| name.name), Some("title".to_string()));

        let bytes = document.to_binary();
        let reread = ResXmlDocument::from_bytes(&bytes).unwrap();
        assert_eq!(reread.resource_map(), document.resource_map());
    }

    #[test]
    fn decoding_restores_symbolic_values() {
        let framework = framework();
        let mut context = EncodeContext::new(0x7f, "com.example");
        context.add_framework(&framework);
        let mut table = TableBlock::new();
        let mut document = XmlEncoder::new(&mut context)
            .encode_str(&mut table, LAYOUT)
            .unwrap();
        let bytes = document.to_binary();
        let reread = ResXmlDocument::from_bytes(&bytes).unwrap();
        let store = crate::value::StoreChain::new(vec![&table as &dyn EntryStore, &framework as &dyn EntryStore]);
        let xml = reread.decode_to_xml(&store, 0x7f).unwrap();
        assert!(xml.contains("android:orientation=\"vertical\""));
        assert!(xml.contains("android:layout_width=\"match_parent\""));
        assert!(xml.contains("android:layout_width=\"12.0dp\""));
        assert!(xml.contains("android:id=\"@id/title\""));
        assert!(xml.contains("tools=\"ignored\""));
    }
}
