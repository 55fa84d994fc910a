//! L5X project export reader
//!
//! Deserializes the `RSLogix5000Content` envelope and the parts of the
//! controller that have table maps: modules, controller and program tags,
//! programs, add-on instructions and their parameters. Everything else in
//! the document (data types, routines, tag data) is skipped.

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::errors::{ExError, ExErrorKind};
use crate::model::{
    AddOnInstruction, Controller, ControllerProject, ExportInfo, Module, Parameter, Program, Tag,
};

/// Export dates are written like `Mon Jan 01 13:45:10 2024`
const EXPORT_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

#[derive(Debug, Error)]
pub enum L5xError {
    #[error("source is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("malformed L5X document: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("L5X document has no Controller element")]
    MissingController,

    #[error("element {element} has an empty Name attribute")]
    MissingName { element: &'static str },

    #[error("invalid value '{value}' for attribute {attribute}")]
    InvalidAttribute {
        attribute: &'static str,
        value: String,
    },
}

impl From<L5xError> for ExError {
    fn from(err: L5xError) -> Self {
        ExError::new(ExErrorKind::Format)
            .with_op("parse_l5x")
            .with_message(err.to_string())
    }
}

// ----- Raw document shape -----

#[derive(Debug, Deserialize)]
struct XContent {
    #[serde(rename = "@SchemaRevision", default)]
    schema_revision: Option<String>,
    #[serde(rename = "@SoftwareRevision", default)]
    software_revision: Option<String>,
    #[serde(rename = "@TargetName", default)]
    target_name: Option<String>,
    #[serde(rename = "@TargetType", default)]
    target_type: Option<String>,
    #[serde(rename = "@ContainsContext", default)]
    contains_context: Option<String>,
    #[serde(rename = "@ExportDate", default)]
    export_date: Option<String>,
    #[serde(rename = "@ExportOptions", default)]
    export_options: Option<String>,
    #[serde(rename = "Controller", default)]
    controller: Option<XController>,
}

#[derive(Debug, Default, Deserialize)]
struct XDescription {
    #[serde(rename = "$text", default)]
    text: Option<String>,
    #[serde(rename = "LocalizedDescription", default)]
    localized: Vec<XLocalized>,
}

#[derive(Debug, Default, Deserialize)]
struct XLocalized {
    #[serde(rename = "$text", default)]
    text: Option<String>,
}

impl XDescription {
    fn into_text(self) -> Option<String> {
        self.text
            .or_else(|| self.localized.into_iter().find_map(|l| l.text))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct XController {
    #[serde(rename = "@Name", default)]
    name: String,
    #[serde(rename = "@ProcessorType", default)]
    processor_type: Option<String>,
    #[serde(rename = "@MajorRev", default)]
    major_rev: Option<String>,
    #[serde(rename = "@MinorRev", default)]
    minor_rev: Option<String>,
    #[serde(rename = "@CommPath", default)]
    comm_path: Option<String>,
    #[serde(rename = "@LastModifiedDate", default)]
    last_modified: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<XDescription>,
    #[serde(rename = "Modules", default)]
    modules: XModules,
    #[serde(rename = "AddOnInstructionDefinitions", default)]
    add_on_instructions: XAddOnInstructions,
    #[serde(rename = "Tags", default)]
    tags: XTags,
    #[serde(rename = "Programs", default)]
    programs: XPrograms,
}

#[derive(Debug, Default, Deserialize)]
struct XModules {
    #[serde(rename = "Module", default)]
    items: Vec<XModule>,
}

#[derive(Debug, Deserialize)]
struct XModule {
    #[serde(rename = "@Name", default)]
    name: String,
    #[serde(rename = "@CatalogNumber", default)]
    catalog_number: Option<String>,
    #[serde(rename = "@Vendor", default)]
    vendor: Option<String>,
    #[serde(rename = "@ProductType", default)]
    product_type: Option<String>,
    #[serde(rename = "@ProductCode", default)]
    product_code: Option<String>,
    #[serde(rename = "@Major", default)]
    major: Option<String>,
    #[serde(rename = "@Minor", default)]
    minor: Option<String>,
    #[serde(rename = "@ParentModule", default)]
    parent_module: Option<String>,
    #[serde(rename = "@ParentModPortId", default)]
    parent_port_id: Option<String>,
    #[serde(rename = "@Inhibited", default)]
    inhibited: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<XDescription>,
}

#[derive(Debug, Default, Deserialize)]
struct XTags {
    #[serde(rename = "Tag", default)]
    items: Vec<XTag>,
}

#[derive(Debug, Deserialize)]
struct XTag {
    #[serde(rename = "@Name", default)]
    name: String,
    #[serde(rename = "@TagType", default)]
    tag_type: Option<String>,
    #[serde(rename = "@DataType", default)]
    data_type: Option<String>,
    #[serde(rename = "@Dimensions", default)]
    dimensions: Option<String>,
    #[serde(rename = "@Radix", default)]
    radix: Option<String>,
    #[serde(rename = "@AliasFor", default)]
    alias_for: Option<String>,
    #[serde(rename = "@Usage", default)]
    usage: Option<String>,
    #[serde(rename = "@Constant", default)]
    constant: Option<String>,
    #[serde(rename = "@ExternalAccess", default)]
    external_access: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<XDescription>,
}

#[derive(Debug, Default, Deserialize)]
struct XPrograms {
    #[serde(rename = "Program", default)]
    items: Vec<XProgram>,
}

#[derive(Debug, Deserialize)]
struct XProgram {
    #[serde(rename = "@Name", default)]
    name: String,
    #[serde(rename = "@Type", default)]
    program_type: Option<String>,
    #[serde(rename = "@MainRoutineName", default)]
    main_routine: Option<String>,
    #[serde(rename = "@FaultRoutineName", default)]
    fault_routine: Option<String>,
    #[serde(rename = "@Disabled", default)]
    disabled: Option<String>,
    #[serde(rename = "@UseAsFolder", default)]
    use_as_folder: Option<String>,
    #[serde(rename = "@Parent", default)]
    parent: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<XDescription>,
    #[serde(rename = "Tags", default)]
    tags: XTags,
}

#[derive(Debug, Default, Deserialize)]
struct XAddOnInstructions {
    #[serde(rename = "AddOnInstructionDefinition", default)]
    items: Vec<XAddOnInstruction>,
}

#[derive(Debug, Deserialize)]
struct XAddOnInstruction {
    #[serde(rename = "@Name", default)]
    name: String,
    #[serde(rename = "@Revision", default)]
    revision: Option<String>,
    #[serde(rename = "@Vendor", default)]
    vendor: Option<String>,
    #[serde(rename = "@ExecutePrescan", default)]
    execute_prescan: Option<String>,
    #[serde(rename = "@ExecutePostscan", default)]
    execute_postscan: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<XDescription>,
    #[serde(rename = "Parameters", default)]
    parameters: XParameters,
}

#[derive(Debug, Default, Deserialize)]
struct XParameters {
    #[serde(rename = "Parameter", default)]
    items: Vec<XParameter>,
}

#[derive(Debug, Deserialize)]
struct XParameter {
    #[serde(rename = "@Name", default)]
    name: String,
    #[serde(rename = "@TagType", default)]
    tag_type: Option<String>,
    #[serde(rename = "@DataType", default)]
    data_type: Option<String>,
    #[serde(rename = "@Usage", default)]
    usage: Option<String>,
    #[serde(rename = "@Radix", default)]
    radix: Option<String>,
    #[serde(rename = "@Required", default)]
    required: Option<String>,
    #[serde(rename = "@Visible", default)]
    visible: Option<String>,
    #[serde(rename = "@ExternalAccess", default)]
    external_access: Option<String>,
    #[serde(rename = "DefaultData", default)]
    default_data: Vec<XDefaultData>,
    #[serde(rename = "Description", default)]
    description: Option<XDescription>,
}

#[derive(Debug, Deserialize)]
struct XDefaultData {
    #[serde(rename = "@Format", default)]
    format: Option<String>,
    #[serde(rename = "$text", default)]
    text: Option<String>,
}

// ----- Attribute helpers -----

fn parse_bool(attribute: &'static str, value: Option<String>) -> Result<bool, L5xError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(L5xError::InvalidAttribute {
            attribute,
            value: v.to_string(),
        }),
    }
}

fn parse_int(attribute: &'static str, value: Option<String>) -> Result<Option<i64>, L5xError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse::<i64>()
            .map(Some)
            .map_err(|_| L5xError::InvalidAttribute {
                attribute,
                value: v.to_string(),
            }),
    }
}

fn require_name(element: &'static str, name: String) -> Result<String, L5xError> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(L5xError::MissingName { element });
    }
    Ok(name)
}

fn description(d: Option<XDescription>) -> Option<String> {
    d.and_then(XDescription::into_text)
}

fn parse_export_date(raw: Option<String>) -> Option<chrono::DateTime<Utc>> {
    let raw = raw?;
    match NaiveDateTime::parse_from_str(raw.trim(), EXPORT_DATE_FORMAT) {
        Ok(naive) => Some(Utc.from_utc_datetime(&naive)),
        Err(e) => {
            tracing::warn!(export_date = %raw, error = %e, "Unrecognised ExportDate, storing none");
            None
        }
    }
}

// ----- Conversion into the element model -----

fn convert_tags(container: &str, tags: XTags) -> Result<Vec<Tag>, L5xError> {
    tags.items
        .into_iter()
        .map(|t| {
            Ok(Tag {
                container: container.to_string(),
                name: require_name("Tag", t.name)?,
                tag_type: t.tag_type,
                data_type: t.data_type,
                dimensions: t.dimensions,
                radix: t.radix,
                alias_for: t.alias_for,
                usage: t.usage,
                constant: parse_bool("Tag@Constant", t.constant)?,
                external_access: t.external_access,
                description: description(t.description),
            })
        })
        .collect()
}

fn convert_module(m: XModule) -> Result<Module, L5xError> {
    Ok(Module {
        name: require_name("Module", m.name)?,
        catalog_number: m.catalog_number,
        vendor: parse_int("Module@Vendor", m.vendor)?,
        product_type: parse_int("Module@ProductType", m.product_type)?,
        product_code: parse_int("Module@ProductCode", m.product_code)?,
        major: parse_int("Module@Major", m.major)?,
        minor: parse_int("Module@Minor", m.minor)?,
        parent_module: m.parent_module,
        parent_port_id: parse_int("Module@ParentModPortId", m.parent_port_id)?,
        inhibited: parse_bool("Module@Inhibited", m.inhibited)?,
        description: description(m.description),
    })
}

fn convert_parameter(p: XParameter) -> Result<Parameter, L5xError> {
    let default_value = p
        .default_data
        .into_iter()
        .filter(|d| d.format.as_deref() != Some("Decorated"))
        .find_map(|d| d.text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    Ok(Parameter {
        name: require_name("Parameter", p.name)?,
        tag_type: p.tag_type,
        data_type: p.data_type,
        usage: p.usage,
        radix: p.radix,
        required: parse_bool("Parameter@Required", p.required)?,
        visible: parse_bool("Parameter@Visible", p.visible)?,
        external_access: p.external_access,
        default_value,
        description: description(p.description),
    })
}

fn convert_aoi(a: XAddOnInstruction) -> Result<AddOnInstruction, L5xError> {
    Ok(AddOnInstruction {
        name: require_name("AddOnInstructionDefinition", a.name)?,
        revision: a.revision,
        vendor: a.vendor,
        execute_prescan: parse_bool("AddOnInstructionDefinition@ExecutePrescan", a.execute_prescan)?,
        execute_postscan: parse_bool(
            "AddOnInstructionDefinition@ExecutePostscan",
            a.execute_postscan,
        )?,
        description: description(a.description),
        parameters: a
            .parameters
            .items
            .into_iter()
            .map(convert_parameter)
            .collect::<Result<_, _>>()?,
    })
}

/// Parse L5X bytes into a `ControllerProject`.
///
/// A leading UTF-8 byte order mark is accepted. When the envelope omits
/// `TargetType`/`TargetName` the controller itself is the target.
pub fn parse_l5x(bytes: &[u8]) -> Result<ControllerProject, L5xError> {
    let text = std::str::from_utf8(bytes)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let content: XContent = quick_xml::de::from_str(text)?;
    let xc = content.controller.ok_or(L5xError::MissingController)?;
    let controller_name = require_name("Controller", xc.name)?;

    let mut tags = convert_tags(&controller_name, xc.tags)?;
    let mut programs = Vec::with_capacity(xc.programs.items.len());
    for p in xc.programs.items {
        let name = require_name("Program", p.name)?;
        tags.extend(convert_tags(&name, p.tags)?);
        programs.push(Program {
            name,
            program_type: p.program_type,
            main_routine: p.main_routine,
            fault_routine: p.fault_routine,
            disabled: parse_bool("Program@Disabled", p.disabled)?,
            use_as_folder: parse_bool("Program@UseAsFolder", p.use_as_folder)?,
            parent: p.parent,
            description: description(p.description),
        });
    }

    let export = ExportInfo {
        target_type: content
            .target_type
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Controller".to_string()),
        target_name: content
            .target_name
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| controller_name.clone()),
        contains_context: parse_bool("ContainsContext", content.contains_context)?,
        schema_revision: content.schema_revision,
        software_revision: content.software_revision,
        export_date: parse_export_date(content.export_date),
        export_options: content.export_options,
    };

    Ok(ControllerProject {
        export,
        controller: Controller {
            name: controller_name,
            processor_type: xc.processor_type,
            major_rev: parse_int("Controller@MajorRev", xc.major_rev)?,
            minor_rev: parse_int("Controller@MinorRev", xc.minor_rev)?,
            comm_path: xc.comm_path,
            last_modified: xc.last_modified,
            description: description(xc.description),
        },
        modules: xc
            .modules
            .items
            .into_iter()
            .map(convert_module)
            .collect::<Result<_, _>>()?,
        programs,
        tags,
        add_on_instructions: xc
            .add_on_instructions
            .items
            .into_iter()
            .map(convert_aoi)
            .collect::<Result<_, _>>()?,
    })
}
