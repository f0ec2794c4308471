// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Extraction of [`ContractDefinitions`] from solc JSON ASTs.

use std::collections::BTreeMap;

use foundry_compilers::artifacts::{Ast, CompilerOutput, Node, NodeType};
use serde::Deserialize;
use tracing::{debug, trace};

use super::{
    ContractDefinition, ContractDefinitions, EnumDefinition, MemberDefinition,
    StateVariableDefinition, StructDefinition,
};

#[derive(Debug, Deserialize)]
struct TypeDescriptions {
    #[serde(rename = "typeString", default)]
    type_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AstMember {
    name: String,
    #[serde(rename = "typeDescriptions")]
    type_descriptions: TypeDescriptions,
}

#[derive(Debug, Deserialize)]
struct AstEnumValue {
    name: String,
}

/// Build definitions from every source AST of a compiler output.
pub fn definitions_from_output(output: &CompilerOutput) -> ContractDefinitions {
    let asts: Vec<_> = output
        .sources
        .iter()
        .filter_map(|(path, source)| {
            source.ast.as_ref().map(|ast| (path.to_string_lossy().into_owned(), ast))
        })
        .collect();
    definitions_from_asts(asts.iter().map(|(path, ast)| (path.as_str(), *ast)))
}

/// Build definitions from `(source path, AST)` pairs.
///
/// Contracts are registered as `path:Name` and reachable by bare name. Linearized
/// bases are resolved across all given sources, so every file of a compilation should
/// be passed in one call.
pub fn definitions_from_asts<'a>(
    asts: impl IntoIterator<Item = (&'a str, &'a Ast)>,
) -> ContractDefinitions {
    let asts: Vec<_> = asts.into_iter().collect();

    // contract ids to qualified keys, across all sources
    let mut keys_by_id = BTreeMap::new();
    for (path, ast) in &asts {
        for node in contract_nodes(ast) {
            if let (Some(id), Some(name)) = (node.id, node.attribute::<String>("name")) {
                keys_by_id.insert(id, format!("{path}:{name}"));
            }
        }
    }

    let mut definitions = ContractDefinitions::new();
    for (path, ast) in &asts {
        for node in &ast.nodes {
            match node.node_type {
                NodeType::ContractDefinition => {
                    let Some(name) = node.attribute::<String>("name") else { continue };
                    let bases = node
                        .attribute::<Vec<usize>>("linearizedBaseContracts")
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|id| keys_by_id.get(&id).cloned())
                        .collect::<Vec<_>>();

                    let mut contract = ContractDefinition::new(name.clone()).with_bases(bases);
                    for child in &node.nodes {
                        match child.node_type {
                            NodeType::VariableDeclaration => {
                                if let Some(variable) = state_variable(child) {
                                    contract.state_variables.push(variable);
                                }
                            }
                            NodeType::StructDefinition => {
                                if let Some(def) = struct_definition(child) {
                                    definitions.add_struct(def);
                                }
                            }
                            NodeType::EnumDefinition => {
                                if let Some(def) = enum_definition(child) {
                                    definitions.add_enum(def);
                                }
                            }
                            _ => {}
                        }
                    }
                    trace!(contract = %name, variables = contract.state_variables.len(), "extracted contract");
                    definitions.add_qualified_contract(format!("{path}:{name}"), contract);
                }
                NodeType::StructDefinition => {
                    if let Some(def) = struct_definition(node) {
                        definitions.add_struct(def);
                    }
                }
                NodeType::EnumDefinition => {
                    if let Some(def) = enum_definition(node) {
                        definitions.add_enum(def);
                    }
                }
                _ => {}
            }
        }
    }

    debug!(contracts = keys_by_id.len(), "extracted definitions from ASTs");
    definitions
}

fn contract_nodes(ast: &Ast) -> impl Iterator<Item = &Node> {
    ast.nodes.iter().filter(|node| matches!(node.node_type, NodeType::ContractDefinition))
}

fn state_variable(node: &Node) -> Option<StateVariableDefinition> {
    if !node.attribute::<bool>("stateVariable").unwrap_or(false) {
        return None;
    }
    let name = node.attribute::<String>("name")?;
    let type_string = node.attribute::<TypeDescriptions>("typeDescriptions")?.type_string?;
    let constant = node.attribute::<bool>("constant").unwrap_or(false)
        || node.attribute::<String>("mutability").is_some_and(|m| m == "immutable");
    Some(StateVariableDefinition { name, type_string, constant })
}

fn struct_definition(node: &Node) -> Option<StructDefinition> {
    let name = node
        .attribute::<String>("canonicalName")
        .or_else(|| node.attribute::<String>("name"))?;
    let members = node
        .attribute::<Vec<AstMember>>("members")?
        .into_iter()
        .filter_map(|member| {
            Some(MemberDefinition {
                name: member.name,
                type_string: member.type_descriptions.type_string?,
            })
        })
        .collect();
    Some(StructDefinition { name, members })
}

fn enum_definition(node: &Node) -> Option<EnumDefinition> {
    let name = node
        .attribute::<String>("canonicalName")
        .or_else(|| node.attribute::<String>("name"))?;
    let variants = node.attribute::<Vec<AstEnumValue>>("members")?;
    Some(EnumDefinition::new(name, variants.into_iter().map(|v| v.name)))
}
