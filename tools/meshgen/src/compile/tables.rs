//! Data table translators
//!
//! A table node exposes one output pin per column. The first evaluation of a
//! column converts every row's value into a [`RuntimeTable`] column that all
//! later references share; the emitted node only selects that column.

use super::context::{GenerationContext, ParameterKind};
use super::mesh::{generate_skeletal_mesh, generate_static_mesh, lod_and_section_for_automatic_lods};
use super::nodes::{NodeColor, NodeMesh, NodeScalar, TableRef};
use crate::assets::{DataTable, TableColumn, TableValue};
use crate::convert::MeshSource;
use crate::dedup::hash_bytes;
use crate::graph::{Node, NodeKind, PinId};
use meshgen_common::RuntimeMesh;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub enum TableCell {
    Scalar(f32),
    Color([f32; 4]),
    /// `None` when the row's mesh could not be converted
    Mesh(Option<Rc<RuntimeMesh>>),
}

#[derive(Debug, Clone)]
pub struct RuntimeColumn {
    pub name: String,
    pub cells: Vec<TableCell>,
}

/// Compiled form of a data table, columns added as they are referenced
#[derive(Debug, Clone)]
pub struct RuntimeTable {
    pub name: String,
    pub rows: Vec<String>,
    pub columns: Vec<RuntimeColumn>,
}

pub type SharedTable = Rc<RefCell<RuntimeTable>>;

impl RuntimeTable {
    pub fn new(source: &DataTable) -> Self {
        Self {
            name: source.name.clone(),
            rows: source.rows.iter().map(|r| r.name.clone()).collect(),
            columns: Vec::new(),
        }
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn add_column(&mut self, name: impl Into<String>, cells: Vec<TableCell>) -> usize {
        self.columns.push(RuntimeColumn {
            name: name.into(),
            cells,
        });
        self.columns.len() - 1
    }

    pub fn cell(&self, column: usize, row: usize) -> Option<&TableCell> {
        self.columns.get(column)?.cells.get(row)
    }
}

fn table_source_id(table: &DataTable) -> u32 {
    hash_bytes(table.name.to_lowercase().as_bytes())
}

/// Table and column a pin of a table node refers to, diagnostics logged
fn lookup_column<'a>(
    ctx: &mut GenerationContext<'a>,
    node: &Node,
    pin: PinId,
) -> Option<(&'a DataTable, &'a TableColumn)> {
    let graph = ctx.graph;
    let tables = ctx.tables;
    let NodeKind::Table { table, .. } = &node.kind else {
        return None;
    };

    let Some(table) = table.as_deref().and_then(|name| tables.resolve_table(name)) else {
        ctx.warn("Couldn't find the data table of the node.", node.id);
        return None;
    };
    if table.rows.is_empty() {
        ctx.warn("Couldn't generate a mutable table.", node.id);
        return None;
    }

    let column_name = graph.pin(pin).map(|p| p.name.as_str()).unwrap_or_default();
    let Some(column) = table.column(column_name) else {
        ctx.warn(
            format!("Couldn't find the column [{column_name}] in the data table's struct."),
            node.id,
        );
        return None;
    };
    Some((table, column))
}

fn missing_default(ctx: &mut GenerationContext, node: &Node, column: &TableColumn) {
    ctx.warn(
        format!(
            "Couldn't find a default value in the data table's struct for the column [{}]",
            column.name
        ),
        node.id,
    );
}

/// Select `column_name` of the node's runtime table, building the column
/// with `build` if no earlier reference did
fn table_ref<'a>(
    ctx: &mut GenerationContext<'a>,
    node: &Node,
    table: &DataTable,
    column_name: String,
    build: impl FnOnce(&mut GenerationContext<'a>) -> Option<Vec<TableCell>>,
) -> Option<TableRef> {
    let NodeKind::Table { parameter_name, .. } = &node.kind else {
        return None;
    };
    let parameter_name = if parameter_name.is_empty() {
        table.name.clone()
    } else {
        parameter_name.clone()
    };

    let runtime = ctx.runtime_table(table);
    let exists = runtime.borrow().find_column(&column_name).is_some();
    if !exists {
        let Some(cells) = build(ctx) else {
            ctx.warn(
                format!("Failed to generate the mutable table column [{column_name}]"),
                node.id,
            );
            return None;
        };
        runtime.borrow_mut().add_column(column_name.clone(), cells);
    }

    ctx.register_parameter(&parameter_name, ParameterKind::Table);
    Some(TableRef {
        table: runtime,
        column: column_name,
        parameter_name,
        source_id: table_source_id(table),
    })
}

/// Row values of a column, the column default standing in for missing ones
pub(super) fn row_values<'t>(
    table: &'t DataTable,
    column: &'t TableColumn,
) -> impl Iterator<Item = (&'t str, Option<&'t TableValue>)> {
    table.rows.iter().map(move |row| {
        (
            row.name.as_str(),
            row.values.get(&column.name).or(column.default.as_ref()),
        )
    })
}

pub(super) fn generate_scalar_table(
    ctx: &mut GenerationContext,
    node: &Node,
    pin: PinId,
) -> Option<Rc<NodeScalar>> {
    let fallback = Some(Rc::new(NodeScalar::Constant(1.0)));
    let Some((table, column)) = lookup_column(ctx, node, pin) else {
        return fallback;
    };
    if !matches!(column.default, Some(TableValue::Scalar(_))) {
        missing_default(ctx, node, column);
        return fallback;
    }

    let cells = row_values(table, column)
        .map(|(_, value)| match value {
            Some(TableValue::Scalar(v)) => Some(TableCell::Scalar(*v)),
            _ => None,
        })
        .collect::<Option<Vec<_>>>();
    match table_ref(ctx, node, table, column.name.clone(), |_| cells) {
        Some(table) => Some(Rc::new(NodeScalar::Table(table))),
        None => fallback,
    }
}

pub(super) fn generate_color_table(
    ctx: &mut GenerationContext,
    node: &Node,
    pin: PinId,
) -> Option<Rc<NodeColor>> {
    let fallback = Some(Rc::new(NodeColor::Constant([1.0; 4])));
    let Some((table, column)) = lookup_column(ctx, node, pin) else {
        return fallback;
    };
    if !matches!(column.default, Some(TableValue::Color(_))) {
        missing_default(ctx, node, column);
        return fallback;
    }

    let cells = row_values(table, column)
        .map(|(_, value)| match value {
            Some(TableValue::Color(c)) => Some(TableCell::Color(*c)),
            _ => None,
        })
        .collect::<Option<Vec<_>>>();
    match table_ref(ctx, node, table, column.name.clone(), |_| cells) {
        Some(table) => Some(Rc::new(NodeColor::Table(table))),
        None => fallback,
    }
}

/// Mesh column of a table, converted row by row
struct MeshRows<'t> {
    node: &'t Node,
    table: &'t DataTable,
    column: &'t TableColumn,
    connected: (u32, u32),
    skeletal: bool,
    only_connected_lod: bool,
}

impl MeshRows<'_> {
    fn convert(&self, ctx: &mut GenerationContext, base: &MeshSource) -> Option<Vec<TableCell>> {
        let assets = ctx.assets;
        let node = self.node;
        let mut cells = Vec::with_capacity(self.table.rows.len());
        for (row, value) in row_values(self.table, self.column) {
            let Some(TableValue::Mesh(reference)) = value else {
                return None;
            };
            let mesh = if self.skeletal {
                assets.skeletal_mesh(&reference.mesh).map(|asset| {
                    let target = lod_and_section_for_automatic_lods(
                        ctx,
                        node,
                        asset,
                        self.connected,
                        self.only_connected_lod,
                    );
                    let mut source = base.clone();
                    source.mesh = asset.name.clone();
                    generate_skeletal_mesh(ctx, node.id, &source, target, self.connected, "")
                })
            } else {
                assets.static_mesh(&reference.mesh).map(|asset| {
                    generate_static_mesh(ctx, node.id, asset, self.connected.0, self.connected.1)
                })
            };
            match mesh {
                Some(mesh) => cells.push(TableCell::Mesh(mesh)),
                None => {
                    ctx.warn(
                        format!("Couldn't find the mesh [{}] of row [{row}]", reference.mesh),
                        node.id,
                    );
                    cells.push(TableCell::Mesh(None));
                }
            }
        }
        Some(cells)
    }
}

fn index_label(index: Option<u32>) -> i64 {
    index.map_or(-1, i64::from)
}

/// Mesh column of a table node
///
/// The column's default mesh decides whether rows are skeletal or static
/// meshes. Skeletal rows follow automatic LODs, so the converted column is
/// named after the LOD and section it was built for.
pub(super) fn generate_mesh_table(
    ctx: &mut GenerationContext,
    node: &Node,
    pin: PinId,
    base: &MeshSource,
    only_connected_lod: bool,
) -> Option<Rc<NodeMesh>> {
    let assets = ctx.assets;
    let fallback = Some(Rc::new(NodeMesh::empty()));
    let NodeKind::Table { sections, .. } = &node.kind else {
        return fallback;
    };
    let Some((table, column)) = lookup_column(ctx, node, pin) else {
        return fallback;
    };
    let Some(TableValue::Mesh(default)) = &column.default else {
        missing_default(ctx, node, column);
        return fallback;
    };
    let connected = sections
        .iter()
        .find(|s| s.pin == pin)
        .map_or((default.lod, default.section), |s| (s.lod, s.section));

    let (column_name, skeletal) = if let Some(default_asset) = assets.skeletal_mesh(&default.mesh) {
        let target =
            lod_and_section_for_automatic_lods(ctx, node, default_asset, connected, only_connected_lod);
        let name = format!(
            "{} LOD_{} Mat_{}",
            column.name,
            index_label(target.map(|t| t.0)),
            index_label(target.map(|t| t.1))
        );
        (name, true)
    } else if assets.static_mesh(&default.mesh).is_some() {
        (format!("{} Mat_{}", column.name, connected.1), false)
    } else {
        missing_default(ctx, node, column);
        return fallback;
    };

    let rows = MeshRows {
        node,
        table,
        column,
        connected,
        skeletal,
        only_connected_lod,
    };
    match table_ref(ctx, node, table, column_name, |ctx| rows.convert(ctx, base)) {
        Some(table) => Some(Rc::new(NodeMesh::Table(table))),
        None => fallback,
    }
}
