//! The processing graph: named inputs, operator chains and named outputs.
//!
//! A graph is generated from an ordered list of [`ModuleConfig`]s. Each module
//! registers inputs, attaches operators and publishes outputs through the
//! builder methods below. Once every module has run, each input's operator
//! chain is materialized after its [`ReadNode`](crate::node::ReadNode): the
//! default operators first, then the input's own.
//!
//! ```text
//! Read ─▶ default ops ─▶ input ops ─▶ Input ─▶ (module nodes) ─▶ outputs
//! ```
//!
//! Builder mistakes (duplicate outputs) are recorded in [`ProcessingGraph::errors`]
//! rather than raised; the first registration wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::module::{ModuleConfig, TextureSetModule};
use crate::node::{NodeArena, NodeId, NodeKind, Operator};
use crate::parameter::ParameterNode;
use crate::texture::{SourceTextureDef, TextureDef};

/// Ordered module list; the identity of a graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Modules in configuration order.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl ModuleInfo {
    /// Wraps a module list.
    pub fn new(modules: Vec<ModuleConfig>) -> Self {
        Self { modules }
    }

    /// Output texture definitions, from a throw-away graph.
    pub fn processed_textures(&self) -> BTreeMap<String, TextureDef> {
        ProcessingGraph::new(&self.modules).processed_texture_defs()
    }

    /// Output parameter names, from a throw-away graph.
    pub fn parameter_names(&self) -> Vec<String> {
        ProcessingGraph::new(&self.modules)
            .output_parameters()
            .keys()
            .cloned()
            .collect()
    }
}

/// Nodes plus the name tables that expose them.
#[derive(Debug, Default)]
pub struct ProcessingGraph {
    arena: NodeArena,
    inputs: BTreeMap<String, NodeId>,
    input_operators: BTreeMap<String, Vec<Operator>>,
    default_input_operators: Vec<Operator>,
    output_textures: BTreeMap<String, NodeId>,
    output_parameters: BTreeMap<String, ParameterNode>,
    errors: Vec<String>,
}

impl ProcessingGraph {
    /// Builds the graph for `modules`.
    pub fn new(modules: &[ModuleConfig]) -> Self {
        let mut graph = Self::default();
        graph.regenerate(modules);
        graph
    }

    /// Discards every node and rebuilds from `modules`.
    pub fn regenerate(&mut self, modules: &[ModuleConfig]) {
        *self = Self::default();

        for module in modules {
            tracing::debug!("graph: configuring {}", module.name());
            module.configure_graph(self);
        }

        let inputs: Vec<(String, NodeId)> =
            self.inputs.iter().map(|(k, v)| (k.clone(), *v)).collect();
        for (name, input) in inputs {
            let NodeKind::Input(node) = self.arena.kind(input) else {
                unreachable!("input table points at a non-input node");
            };
            let mut last = node.read;

            let defaults = self.default_input_operators.clone();
            let own = self.input_operators.get(&name).cloned().unwrap_or_default();
            for op in defaults.iter().chain(&own) {
                last = self.arena.add(op.instantiate(last));
            }

            if let NodeKind::Input(node) = self.arena.kind_mut(input) {
                node.last = last;
            }
        }

        tracing::debug!(
            "graph: {} nodes, {} inputs, {} textures, {} parameters",
            self.arena.len(),
            self.inputs.len(),
            self.output_textures.len(),
            self.output_parameters.len()
        );
    }

    // --- builder ---

    /// Registers a named input, or returns the existing one.
    pub fn add_input(&mut self, name: &str, def: SourceTextureDef) -> NodeId {
        if let Some(&id) = self.inputs.get(name) {
            return id;
        }
        let id = self.arena.add_input(name, def);
        self.inputs.insert(name.to_string(), id);
        id
    }

    /// Appends an operator to one input's chain.
    pub fn add_input_operator(&mut self, input: NodeId, op: Operator) {
        let NodeKind::Input(node) = self.arena.kind(input) else {
            panic!("{input} is not an input node");
        };
        self.input_operators
            .entry(node.name.clone())
            .or_default()
            .push(op);
    }

    /// Appends an operator applied to every input before its own operators.
    pub fn add_default_input_operator(&mut self, op: Operator) {
        self.default_input_operators.push(op);
    }

    /// Adds a free-standing node.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        self.arena.add(kind)
    }

    /// Publishes `node` as output texture `name`. Duplicates are errors.
    pub fn add_output_texture(&mut self, name: &str, node: NodeId) {
        if self.output_textures.contains_key(name) {
            self.errors
                .push(format!("output texture '{name}' is already defined"));
            return;
        }
        self.output_textures.insert(name.to_string(), node);
    }

    /// Publishes `node` as output texture `name`, replacing any existing one.
    pub fn add_output_texture_override(&mut self, name: &str, node: NodeId) {
        self.output_textures.insert(name.to_string(), node);
    }

    /// Publishes a parameter. Duplicates are errors.
    pub fn add_output_parameter(&mut self, name: &str, node: ParameterNode) {
        if self.output_parameters.contains_key(name) {
            self.errors
                .push(format!("output parameter '{name}' is already defined"));
            return;
        }
        self.output_parameters.insert(name.to_string(), node);
    }

    // --- queries ---

    /// Inputs by name.
    pub fn inputs(&self) -> &BTreeMap<String, NodeId> {
        &self.inputs
    }

    /// Output textures by name.
    pub fn output_textures(&self) -> &BTreeMap<String, NodeId> {
        &self.output_textures
    }

    /// Output parameters by name.
    pub fn output_parameters(&self) -> &BTreeMap<String, ParameterNode> {
        &self.output_parameters
    }

    /// The node arena.
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// Mutable access for preparing nodes and wrapping outputs.
    pub fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    /// Builder errors.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Definition of each output texture.
    pub fn processed_texture_defs(&self) -> BTreeMap<String, TextureDef> {
        self.output_textures
            .iter()
            .map(|(name, &id)| (name.clone(), self.arena.texture_def(id)))
            .collect()
    }
}
