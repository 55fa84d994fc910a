//! Table maps: element kind -> destination table rows
//!
//! Every map is a pure projection from the parsed project to rows of values
//! in declared column order. `snapshot_id`, the surrogate `id` and
//! `record_hash` are not projected; the import plan and sessions add them.

use ctrlsnap_core::errors::{ExError, ExErrorKind};
use ctrlsnap_core::{ControllerProject, Value};

use crate::errors::Result;

/// Storage type of a mapped column; selects typed NULL binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

const fn text(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Text,
    }
}

const fn int(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Integer,
    }
}

const fn flag(name: &'static str) -> Column {
    Column {
        name,
        ty: ColumnType::Bool,
    }
}

pub type Projection = fn(&ControllerProject) -> Result<Vec<Vec<Value>>>;

/// Destination table identity plus its projection
pub struct TableMap {
    pub table: &'static str,
    pub columns: &'static [Column],
    /// Leading columns that identify a row within one snapshot
    pub natural_key: &'static [&'static str],
    pub project: Projection,
}

impl TableMap {
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Positions of the natural key columns within `columns`
    pub fn key_positions(&self) -> Vec<usize> {
        self.natural_key
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c.name == *k))
            .collect()
    }

    /// Run the projection and check row shape and key completeness.
    ///
    /// # Errors
    ///
    /// `Projection` when a row has the wrong arity or a null key column.
    pub fn rows(&self, project: &ControllerProject) -> Result<Vec<Vec<Value>>> {
        let rows = (self.project)(project)?;
        let keys = self.key_positions();
        for row in &rows {
            if row.len() != self.columns.len() {
                return Err(projection_error(
                    self.table,
                    format!("row has {} values, table has {} columns", row.len(), self.columns.len()),
                ));
            }
            if let Some(pos) = keys.iter().find(|&&p| row[p].is_null()) {
                return Err(projection_error(
                    self.table,
                    format!("natural key column '{}' is missing", self.columns[*pos].name),
                ));
            }
        }
        Ok(rows)
    }

    /// Natural key text of a projected row, `/`-joined
    pub fn key_of(&self, row: &[Value]) -> String {
        self.key_positions()
            .into_iter()
            .map(|p| row.get(p).map(Value::key_text).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl std::fmt::Debug for TableMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableMap")
            .field("table", &self.table)
            .field("natural_key", &self.natural_key)
            .finish()
    }
}

pub(crate) fn projection_error(table: &str, message: impl Into<String>) -> ExError {
    ExError::new(ExErrorKind::Projection)
        .with_op(format!("project_{}", table))
        .with_message(message)
}

fn non_empty(table: &str, what: &str, value: &str) -> Result<Value> {
    if value.trim().is_empty() {
        return Err(projection_error(table, format!("{} is empty", what)));
    }
    Ok(Value::from(value))
}

// ----- Projections -----

fn project_controller(p: &ControllerProject) -> Result<Vec<Vec<Value>>> {
    let c = &p.controller;
    Ok(vec![vec![
        non_empty("controller", "controller name", &c.name)?,
        Value::from(c.processor_type.as_ref()),
        Value::from(c.major_rev),
        Value::from(c.minor_rev),
        Value::from(c.comm_path.as_ref()),
        Value::from(c.last_modified.as_ref()),
        Value::from(c.description.as_ref()),
    ]])
}

fn project_modules(p: &ControllerProject) -> Result<Vec<Vec<Value>>> {
    p.modules
        .iter()
        .map(|m| {
            Ok(vec![
                non_empty("module", "module name", &m.name)?,
                Value::from(m.catalog_number.as_ref()),
                Value::from(m.vendor),
                Value::from(m.product_type),
                Value::from(m.product_code),
                Value::from(m.major),
                Value::from(m.minor),
                Value::from(m.parent_module.as_ref()),
                Value::from(m.parent_port_id),
                Value::from(m.inhibited),
                Value::from(m.description.as_ref()),
            ])
        })
        .collect()
}

fn project_programs(p: &ControllerProject) -> Result<Vec<Vec<Value>>> {
    p.programs
        .iter()
        .map(|pr| {
            Ok(vec![
                non_empty("program", "program name", &pr.name)?,
                Value::from(pr.program_type.as_ref()),
                Value::from(pr.main_routine.as_ref()),
                Value::from(pr.fault_routine.as_ref()),
                Value::from(pr.disabled),
                Value::from(pr.use_as_folder),
                Value::from(pr.parent.as_ref()),
                Value::from(pr.description.as_ref()),
            ])
        })
        .collect()
}

fn project_tags(p: &ControllerProject) -> Result<Vec<Vec<Value>>> {
    p.tags
        .iter()
        .map(|t| {
            Ok(vec![
                non_empty("tag", "tag container", &t.container)?,
                non_empty("tag", "tag name", &t.name)?,
                Value::from(t.tag_type.as_ref()),
                Value::from(t.data_type.as_ref()),
                Value::from(t.dimensions.as_ref()),
                Value::from(t.radix.as_ref()),
                Value::from(t.alias_for.as_ref()),
                Value::from(t.usage.as_ref()),
                Value::from(t.constant),
                Value::from(t.external_access.as_ref()),
                Value::from(t.description.as_ref()),
            ])
        })
        .collect()
}

fn project_aois(p: &ControllerProject) -> Result<Vec<Vec<Value>>> {
    p.add_on_instructions
        .iter()
        .map(|a| {
            Ok(vec![
                non_empty("aoi", "add-on instruction name", &a.name)?,
                Value::from(a.revision.as_ref()),
                Value::from(a.vendor.as_ref()),
                Value::from(a.execute_prescan),
                Value::from(a.execute_postscan),
                Value::from(a.description.as_ref()),
            ])
        })
        .collect()
}

fn project_parameters(p: &ControllerProject) -> Result<Vec<Vec<Value>>> {
    p.parameters()
        .map(|(aoi, prm)| {
            Ok(vec![
                non_empty("parameter", "add-on instruction name", aoi)?,
                non_empty("parameter", "parameter name", &prm.name)?,
                Value::from(prm.tag_type.as_ref()),
                Value::from(prm.data_type.as_ref()),
                Value::from(prm.usage.as_ref()),
                Value::from(prm.radix.as_ref()),
                Value::from(prm.required),
                Value::from(prm.visible),
                Value::from(prm.external_access.as_ref()),
                Value::from(prm.default_value.as_ref()),
                Value::from(prm.description.as_ref()),
            ])
        })
        .collect()
}

static TABLE_MAPS: [TableMap; 6] = [
    TableMap {
        table: "controller",
        columns: &[
            text("name"),
            text("processor_type"),
            int("major_rev"),
            int("minor_rev"),
            text("comm_path"),
            text("last_modified"),
            text("description"),
        ],
        natural_key: &["name"],
        project: project_controller,
    },
    TableMap {
        table: "module",
        columns: &[
            text("name"),
            text("catalog_number"),
            int("vendor"),
            int("product_type"),
            int("product_code"),
            int("major"),
            int("minor"),
            text("parent_module"),
            int("parent_port_id"),
            flag("inhibited"),
            text("description"),
        ],
        natural_key: &["name"],
        project: project_modules,
    },
    TableMap {
        table: "program",
        columns: &[
            text("name"),
            text("program_type"),
            text("main_routine"),
            text("fault_routine"),
            flag("disabled"),
            flag("use_as_folder"),
            text("parent"),
            text("description"),
        ],
        natural_key: &["name"],
        project: project_programs,
    },
    TableMap {
        table: "tag",
        columns: &[
            text("container"),
            text("name"),
            text("tag_type"),
            text("data_type"),
            text("dimensions"),
            text("radix"),
            text("alias_for"),
            text("usage"),
            flag("constant"),
            text("external_access"),
            text("description"),
        ],
        natural_key: &["container", "name"],
        project: project_tags,
    },
    TableMap {
        table: "aoi",
        columns: &[
            text("name"),
            text("revision"),
            text("vendor"),
            flag("execute_prescan"),
            flag("execute_postscan"),
            text("description"),
        ],
        natural_key: &["name"],
        project: project_aois,
    },
    TableMap {
        table: "parameter",
        columns: &[
            text("aoi_name"),
            text("name"),
            text("tag_type"),
            text("data_type"),
            text("usage"),
            text("radix"),
            flag("required"),
            flag("visible"),
            text("external_access"),
            text("default_value"),
            text("description"),
        ],
        natural_key: &["aoi_name", "name"],
        project: project_parameters,
    },
];

/// Registered table maps in write order (parents before children)
pub fn table_maps() -> &'static [TableMap] {
    &TABLE_MAPS
}

/// Find a registered map by table name.
///
/// # Errors
///
/// `InvalidInput` for a table that has no map.
pub fn table_map(table: &str) -> Result<&'static TableMap> {
    table_maps().iter().find(|m| m.table == table).ok_or_else(|| {
        ExError::new(ExErrorKind::InvalidInput)
            .with_op("table_map")
            .with_message(format!("no table map for '{}'", table))
    })
}
