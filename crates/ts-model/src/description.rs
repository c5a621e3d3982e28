//! Wire shape of the model description file.
//!
//! The primary format is XML:
//!
//! ```xml
//! <tlogs>
//!   <tlog name="kill" version="1" sharding="month" comment="kills">
//!     <field name="attacker" type="varchar(64)" comment="attacker id" index="true"/>
//!     <field name="victim" type="varchar(64)" comment="victim id"/>
//!   </tlog>
//! </tlogs>
//! ```
//!
//! The same structure is accepted as JSON with a `models` array and a
//! `fields` array per model.

use serde::{Deserialize, Serialize};

use crate::model::Sharding;

/// Root element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDescription {
    #[serde(rename = "tlog", alias = "models", default)]
    pub models: Vec<ModelEntry>,
}

/// One `<tlog>` entry, before audit fields are added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(rename = "@name", alias = "name")]
    pub name: String,

    #[serde(rename = "@version", alias = "version")]
    pub version: i32,

    #[serde(rename = "@sharding", alias = "sharding", default)]
    pub sharding: Sharding,

    #[serde(rename = "@comment", alias = "comment", default)]
    pub comment: String,

    #[serde(rename = "field", alias = "fields", default)]
    pub fields: Vec<FieldEntry>,
}

/// One declared `<field>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldEntry {
    #[serde(rename = "@name", alias = "name")]
    pub name: String,

    #[serde(rename = "@type", alias = "type")]
    pub sql_type: String,

    #[serde(rename = "@comment", alias = "comment", default)]
    pub comment: String,

    #[serde(rename = "@index", alias = "index", default)]
    pub index: bool,
}

impl ModelDescription {
    pub fn from_xml_str(xml: &str) -> Result<Self, quick_xml::DeError> {
        quick_xml::de::from_str(xml)
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xml_attributes_and_children() {
        let xml = r#"
            <tlogs>
              <tlog name="kill" version="2" sharding="month" comment="kills">
                <field name="attacker" type="varchar(64)" comment="who" index="true"/>
                <field name="victim" type="varchar(64)" comment="whom"/>
              </tlog>
              <tlog name="online" version="1">
                <field name="count" type="int"/>
              </tlog>
            </tlogs>"#;
        let desc = ModelDescription::from_xml_str(xml).unwrap();
        assert_eq!(desc.models.len(), 2);

        let kill = &desc.models[0];
        assert_eq!(kill.name, "kill");
        assert_eq!(kill.version, 2);
        assert_eq!(kill.sharding, Sharding::Month);
        assert_eq!(kill.fields.len(), 2);
        assert!(kill.fields[0].index);
        assert!(!kill.fields[1].index);

        let online = &desc.models[1];
        assert_eq!(online.sharding, Sharding::None);
        assert_eq!(online.comment, "");
    }

    #[test]
    fn parses_json_form() {
        let json = r#"{"models":[{"name":"kill","version":1,"sharding":"none",
            "fields":[{"name":"attacker","type":"varchar(64)","index":true}]}]}"#;
        let desc = ModelDescription::from_json_str(json).unwrap();
        assert_eq!(desc.models[0].fields[0].sql_type, "varchar(64)");
        assert!(desc.models[0].fields[0].index);
    }

    #[test]
    fn empty_sharding_attribute_means_unsharded() {
        let xml = r#"<tlogs><tlog name="a" version="1" sharding=""/></tlogs>"#;
        let desc = ModelDescription::from_xml_str(xml).unwrap();
        assert_eq!(desc.models[0].sharding, Sharding::None);
        assert!(desc.models[0].fields.is_empty());
    }
}
