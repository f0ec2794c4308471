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

//! Compile-time definitions the layout planner needs.
//!
//! This is a plain model of the parts of a compilation that matter for storage:
//! contracts with their state variables and linearized bases, and the struct and
//! enum definitions type strings refer to. It can be filled by hand or extracted
//! from solc ASTs (see [`super::ast`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A state variable as declared in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVariableDefinition {
    /// Variable name
    pub name: String,
    /// Compiler type string, e.g. `mapping(address => uint256)`
    pub type_string: String,
    /// Constant and immutable variables occupy no storage
    pub constant: bool,
}

/// A contract and the state variables it declares itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDefinition {
    /// Contract name
    pub name: String,
    /// Linearized inheritance chain, most derived first, including the contract itself.
    /// Entries are keys into [`ContractDefinitions`].
    pub linearized_bases: Vec<String>,
    /// State variables in declaration order
    pub state_variables: Vec<StateVariableDefinition>,
}

impl ContractDefinition {
    /// Create a contract with no bases and no variables.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Set the linearized inheritance chain (most derived first).
    pub fn with_bases<I, S>(mut self, bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linearized_bases = bases.into_iter().map(Into::into).collect();
        self
    }

    /// Append a mutable state variable.
    pub fn with_variable(mut self, name: impl Into<String>, type_string: impl Into<String>) -> Self {
        self.state_variables.push(StateVariableDefinition {
            name: name.into(),
            type_string: type_string.into(),
            constant: false,
        });
        self
    }

    /// Append a constant (or immutable) state variable.
    pub fn with_constant(mut self, name: impl Into<String>, type_string: impl Into<String>) -> Self {
        self.state_variables.push(StateVariableDefinition {
            name: name.into(),
            type_string: type_string.into(),
            constant: true,
        });
        self
    }
}

/// A struct member as declared in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDefinition {
    /// Member name
    pub name: String,
    /// Compiler type string
    pub type_string: String,
}

/// A struct definition keyed by its canonical name (`Contract.Struct` or `Struct`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDefinition {
    /// Canonical name
    pub name: String,
    /// Members in declaration order
    pub members: Vec<MemberDefinition>,
}

impl StructDefinition {
    /// Create a struct with no members.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), members: Vec::new() }
    }

    /// Append a member.
    pub fn with_member(mut self, name: impl Into<String>, type_string: impl Into<String>) -> Self {
        self.members.push(MemberDefinition { name: name.into(), type_string: type_string.into() });
        self
    }
}

/// An enum definition keyed by its canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDefinition {
    /// Canonical name
    pub name: String,
    /// Variant names in declaration order
    pub variants: Vec<String>,
}

impl EnumDefinition {
    /// Create an enum from its variants.
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { name: name.into(), variants: variants.into_iter().map(Into::into).collect() }
    }
}

/// All definitions of one compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractDefinitions {
    contracts: BTreeMap<String, ContractDefinition>,
    /// Short names pointing at qualified contract keys
    aliases: BTreeMap<String, String>,
    structs: BTreeMap<String, StructDefinition>,
    enums: BTreeMap<String, EnumDefinition>,
}

impl ContractDefinitions {
    /// Create an empty set of definitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contract under its own name.
    pub fn add_contract(&mut self, contract: ContractDefinition) -> &mut Self {
        self.contracts.insert(contract.name.clone(), contract);
        self
    }

    /// Register a contract under a qualified key (`path:Name`), also reachable by
    /// its bare name.
    pub fn add_qualified_contract(
        &mut self,
        key: impl Into<String>,
        contract: ContractDefinition,
    ) -> &mut Self {
        let key = key.into();
        self.aliases.entry(contract.name.clone()).or_insert_with(|| key.clone());
        self.contracts.insert(key, contract);
        self
    }

    /// Register a struct.
    pub fn add_struct(&mut self, definition: StructDefinition) -> &mut Self {
        self.structs.insert(definition.name.clone(), definition);
        self
    }

    /// Register an enum.
    pub fn add_enum(&mut self, definition: EnumDefinition) -> &mut Self {
        self.enums.insert(definition.name.clone(), definition);
        self
    }

    /// Look up a contract by key or bare name.
    pub fn contract(&self, name: &str) -> Option<&ContractDefinition> {
        self.contracts
            .get(name)
            .or_else(|| self.aliases.get(name).and_then(|key| self.contracts.get(key)))
    }

    /// All contract keys.
    pub fn contract_names(&self) -> impl Iterator<Item = &str> {
        self.contracts.keys().map(String::as_str)
    }

    /// Look up a struct by canonical name, falling back to the contract scope and then
    /// to a unique definition with the same unqualified name.
    pub fn find_struct(&self, name: &str, contract_name: &str) -> Option<&StructDefinition> {
        find_scoped(&self.structs, name, contract_name)
    }

    /// Look up an enum the same way as [`Self::find_struct`].
    pub fn find_enum(&self, name: &str, contract_name: &str) -> Option<&EnumDefinition> {
        find_scoped(&self.enums, name, contract_name)
    }

    /// The state variables of a contract including inherited ones, base first.
    pub fn inherited_state_variables(
        &self,
        contract_name: &str,
    ) -> Option<Vec<&StateVariableDefinition>> {
        let contract = self.contract(contract_name)?;
        if contract.linearized_bases.is_empty() {
            return Some(contract.state_variables.iter().collect());
        }

        let mut variables = Vec::new();
        for base in contract.linearized_bases.iter().rev() {
            match self.contract(base) {
                Some(base) => variables.extend(base.state_variables.iter()),
                None => tracing::warn!(contract = contract_name, base, "missing base contract"),
            }
        }
        Some(variables)
    }
}

fn find_scoped<'a, T>(map: &'a BTreeMap<String, T>, name: &str, contract_name: &str) -> Option<&'a T> {
    if let Some(found) = map.get(name) {
        return Some(found);
    }

    let short = name.rsplit('.').next().unwrap_or(name);
    let contract_short = contract_name.rsplit(':').next().unwrap_or(contract_name);
    if let Some(found) = map.get(&format!("{contract_short}.{short}")) {
        return Some(found);
    }

    let mut candidates =
        map.iter().filter(|(key, _)| key.rsplit('.').next() == Some(short)).map(|(_, v)| v);
    match (candidates.next(), candidates.next()) {
        (Some(found), None) => Some(found),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definitions() -> ContractDefinitions {
        let mut defs = ContractDefinitions::new();
        defs.add_qualified_contract(
            "src/Base.sol:Base",
            ContractDefinition::new("Base").with_bases(["src/Base.sol:Base"]).with_variable("a", "uint256"),
        )
        .add_qualified_contract(
            "src/Child.sol:Child",
            ContractDefinition::new("Child")
                .with_bases(["src/Child.sol:Child", "src/Base.sol:Base"])
                .with_variable("b", "bool"),
        )
        .add_struct(StructDefinition::new("Child.S").with_member("x", "uint8"))
        .add_enum(EnumDefinition::new("Status", ["On", "Off"]));
        defs
    }

    #[test]
    fn test_contract_lookup_by_alias() {
        let defs = definitions();
        assert_eq!(defs.contract("Child").unwrap().name, "Child");
        assert_eq!(defs.contract("src/Child.sol:Child").unwrap().name, "Child");
        assert!(defs.contract("Missing").is_none());
    }

    #[test]
    fn test_inherited_variables_base_first() {
        let defs = definitions();
        let names: Vec<_> = defs
            .inherited_state_variables("Child")
            .unwrap()
            .into_iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_scoped_lookup() {
        let defs = definitions();
        assert!(defs.find_struct("Child.S", "Child").is_some());
        assert!(defs.find_struct("S", "src/Child.sol:Child").is_some());
        assert!(defs.find_enum("Other.Status", "Child").is_some());
        assert!(defs.find_enum("Missing", "Child").is_none());
    }
}
