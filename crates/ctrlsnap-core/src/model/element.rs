//! Typed controller-project elements
//!
//! A `ControllerProject` is the in-memory element graph of one exported
//! target. Tags and add-on-instruction parameters are kept flat with a
//! reference to their container so table maps can project them without
//! walking the tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::snapshot::TargetKey;

/// Attributes of the export envelope (the root element of the file)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportInfo {
    pub target_type: String,
    pub target_name: String,
    /// Set when the export only carries context for a partial target
    pub contains_context: bool,
    pub schema_revision: Option<String>,
    pub software_revision: Option<String>,
    pub export_date: Option<DateTime<Utc>>,
    pub export_options: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub name: String,
    pub processor_type: Option<String>,
    pub major_rev: Option<i64>,
    pub minor_rev: Option<i64>,
    pub comm_path: Option<String>,
    pub last_modified: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub catalog_number: Option<String>,
    pub vendor: Option<i64>,
    pub product_type: Option<i64>,
    pub product_code: Option<i64>,
    pub major: Option<i64>,
    pub minor: Option<i64>,
    pub parent_module: Option<String>,
    pub parent_port_id: Option<i64>,
    pub inhibited: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub program_type: Option<String>,
    pub main_routine: Option<String>,
    pub fault_routine: Option<String>,
    pub disabled: bool,
    pub use_as_folder: bool,
    pub parent: Option<String>,
    pub description: Option<String>,
}

/// A tag, scoped to the controller or to one program
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Name of the controller or program that owns the tag
    pub container: String,
    pub name: String,
    pub tag_type: Option<String>,
    pub data_type: Option<String>,
    pub dimensions: Option<String>,
    pub radix: Option<String>,
    pub alias_for: Option<String>,
    pub usage: Option<String>,
    pub constant: bool,
    pub external_access: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddOnInstruction {
    pub name: String,
    pub revision: Option<String>,
    pub vendor: Option<String>,
    pub execute_prescan: bool,
    pub execute_postscan: bool,
    pub description: Option<String>,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub tag_type: Option<String>,
    pub data_type: Option<String>,
    pub usage: Option<String>,
    pub radix: Option<String>,
    pub required: bool,
    pub visible: bool,
    pub external_access: Option<String>,
    pub default_value: Option<String>,
    pub description: Option<String>,
}

/// Queryable element graph for one exported target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerProject {
    pub export: ExportInfo,
    pub controller: Controller,
    pub modules: Vec<Module>,
    pub programs: Vec<Program>,
    pub tags: Vec<Tag>,
    pub add_on_instructions: Vec<AddOnInstruction>,
}

impl ControllerProject {
    /// Identity of the exported target this project represents
    pub fn target(&self) -> TargetKey {
        TargetKey::new(&self.export.target_type, &self.export.target_name)
    }

    /// Tags owned directly by the controller
    pub fn controller_tags(&self) -> impl Iterator<Item = &Tag> {
        let scope = self.controller.name.as_str();
        self.tags.iter().filter(move |t| t.container == scope)
    }

    /// Tags owned by the named program
    pub fn program_tags<'a>(&'a self, program: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |t| t.container == program)
    }

    /// Add-on-instruction parameters paired with their owning instruction name
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.add_on_instructions
            .iter()
            .flat_map(|aoi| aoi.parameters.iter().map(move |p| (aoi.name.as_str(), p)))
    }

    /// Total number of elements across every kind (the controller counts as one)
    pub fn element_count(&self) -> usize {
        1 + self.modules.len()
            + self.programs.len()
            + self.tags.len()
            + self.add_on_instructions.len()
            + self.parameters().count()
    }
}
