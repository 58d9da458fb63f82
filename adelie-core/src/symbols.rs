//! Scope-stack identifier table.
//!
//! Visibility is deliberately two-level: `find` consults the current scope
//! and the global scope, never the scopes in between. The stack itself
//! exists only for push/pop bookkeeping as procedure bodies open and close.

use std::collections::HashMap;
use std::fmt;

/// Static type of an identifier or expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Float,
    Bool,
    Str,
    Procedure,
    Program,
}

impl DataType {
    /// Valid operand of `+ - * /`.
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Integer | DataType::Float)
    }

    /// Valid operand of relational and logical operators.
    pub fn is_logical(self) -> bool {
        matches!(self, DataType::Integer | DataType::Bool)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::Str => "string",
            DataType::Procedure => "procedure",
            DataType::Program => "program",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirection {
    In,
    Out,
}

/// Which address formula applies to a piece of data (see the emitter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Global,
    Param,
    Local,
}

pub type LabelId = u32;

/// Where an identifier lives.
///
/// Data identifiers carry a stack/global offset; callable identifiers
/// carry the label of their entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Scalar { region: Region, offset: u32 },
    Array { region: Region, offset: u32, len: u32 },
    Label(LabelId),
}

impl Storage {
    pub fn region(self) -> Option<Region> {
        match self {
            Storage::Scalar { region, .. } | Storage::Array { region, .. } => Some(region),
            Storage::Label(_) => None,
        }
    }
}

/// A formal parameter of a procedure (or program; programs have none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: DataType,
    pub direction: ParamDirection,
}

/// One declared name.
///
/// `params` is `Some` exactly for procedure/program identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub ty: DataType,
    pub storage: Storage,
    pub params: Option<Vec<Parameter>>,
}

impl Identifier {
    pub fn scalar(name: &str, ty: DataType, region: Region, offset: u32) -> Self {
        Identifier {
            name: name.to_string(),
            ty,
            storage: Storage::Scalar { region, offset },
            params: None,
        }
    }
}

/// Failure modes of table operations; the parser turns these into
/// Name diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    Duplicate(String),
    Unknown(String),
    /// A `global` declaration outside the program-body scope.
    MisplacedGlobal(String),
}

impl NameError {
    pub fn message(&self) -> String {
        match self {
            NameError::Duplicate(name) => format!("'{name}' is already declared in this scope"),
            NameError::Unknown(name) => format!("unknown identifier '{name}'"),
            NameError::MisplacedGlobal(name) => {
                format!("'{name}': global declarations are only legal in the program body")
            }
        }
    }
}

#[derive(Debug)]
struct Scope {
    /// The procedure/program identifier that opened this scope;
    /// `None` for the outermost (global) scope.
    owner: Option<Identifier>,
    names: HashMap<String, Identifier>,
}

/// The identifier table: a scope stack with two-level lookup.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            scopes: vec![Scope {
                owner: None,
                names: HashMap::new(),
            }],
        }
    }

    pub fn push_scope(&mut self, owner: Identifier) {
        self.scopes.push(Scope {
            owner: Some(owner),
            names: HashMap::new(),
        });
    }

    pub fn pop_scope(&mut self) {
        // The global scope is never popped.
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// The identifier that opened the active scope, or `None` at
    /// global scope.
    pub fn current_owner(&self) -> Option<&Identifier> {
        self.scopes.last().and_then(|s| s.owner.as_ref())
    }

    /// Declare a name in the current scope, or in the global scope when
    /// `is_global` is set.
    ///
    /// A global declaration is only legal while exactly one non-global
    /// scope (the program body) is open, and clashes against both the
    /// current and the global scope.
    pub fn add(&mut self, identifier: Identifier, is_global: bool) -> Result<(), NameError> {
        let name = identifier.name.clone();
        if is_global {
            if self.scopes.len() != 2 {
                return Err(NameError::MisplacedGlobal(name));
            }
            if self.scopes[0].names.contains_key(&name)
                || self.scopes[self.scopes.len() - 1].names.contains_key(&name)
            {
                return Err(NameError::Duplicate(name));
            }
            self.scopes[0].names.insert(name, identifier);
            return Ok(());
        }

        let current = self
            .scopes
            .last_mut()
            .expect("the global scope is always present");
        if current.names.contains_key(&name) {
            return Err(NameError::Duplicate(name));
        }
        current.names.insert(name, identifier);
        Ok(())
    }

    /// Look a name up in the current scope, then the global scope.
    pub fn find(&self, name: &str) -> Result<&Identifier, NameError> {
        if let Some(id) = self.scopes.last().and_then(|s| s.names.get(name)) {
            return Ok(id);
        }
        if let Some(id) = self.scopes[0].names.get(name) {
            return Ok(id);
        }
        Err(NameError::Unknown(name.to_string()))
    }

    /// Region of a data identifier, selecting its address formula.
    pub fn location_of(&self, name: &str) -> Option<Region> {
        self.find(name).ok().and_then(|id| id.storage.region())
    }

    /// Whether `name` is a formal parameter of the procedure owning the
    /// current scope.
    pub fn is_param(&self, name: &str) -> bool {
        self.direction_of(name).is_some()
    }

    /// Direction of `name` when it is a parameter of the enclosing
    /// procedure; `None` otherwise.
    pub fn direction_of(&self, name: &str) -> Option<ParamDirection> {
        let owner = self.current_owner()?;
        let params = owner.params.as_ref()?;
        params.iter().find(|p| p.name == name).map(|p| p.direction)
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        SymbolTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_owner() -> Identifier {
        Identifier {
            name: "main".to_string(),
            ty: DataType::Program,
            storage: Storage::Label(0),
            params: Some(Vec::new()),
        }
    }

    #[test]
    fn find_after_add_returns_the_declaration() {
        let mut table = SymbolTable::new();
        table.push_scope(program_owner());
        let id = Identifier::scalar("x", DataType::Integer, Region::Local, 1);
        table.add(id.clone(), false).expect("first add succeeds");
        let found = table.find("x").expect("found in current scope");
        assert_eq!(found, &id);
    }

    #[test]
    fn duplicate_in_same_scope_is_rejected() {
        let mut table = SymbolTable::new();
        table.push_scope(program_owner());
        let id = Identifier::scalar("x", DataType::Integer, Region::Local, 1);
        table.add(id.clone(), false).expect("first add succeeds");
        assert_eq!(
            table.add(id, false),
            Err(NameError::Duplicate("x".to_string()))
        );
    }

    #[test]
    fn lookup_skips_intermediate_scopes() {
        let mut table = SymbolTable::new();
        table.push_scope(program_owner());
        table
            .add(
                Identifier::scalar("g", DataType::Bool, Region::Global, 0),
                true,
            )
            .expect("global add");
        table
            .add(
                Identifier::scalar("middle", DataType::Integer, Region::Local, 1),
                false,
            )
            .expect("local add");

        let inner = Identifier {
            name: "p".to_string(),
            ty: DataType::Procedure,
            storage: Storage::Label(1),
            params: Some(Vec::new()),
        };
        table.push_scope(inner);

        // Global is visible, the program-body local is not.
        assert!(table.find("g").is_ok());
        assert_eq!(
            table.find("middle"),
            Err(NameError::Unknown("middle".to_string()))
        );
    }

    #[test]
    fn global_outside_program_body_is_structural() {
        let mut table = SymbolTable::new();
        // Only the global scope is open.
        let id = Identifier::scalar("x", DataType::Integer, Region::Global, 0);
        assert_eq!(
            table.add(id.clone(), true),
            Err(NameError::MisplacedGlobal("x".to_string()))
        );

        // Two non-global scopes open: also illegal.
        table.push_scope(program_owner());
        table.push_scope(program_owner());
        assert_eq!(
            table.add(id, true),
            Err(NameError::MisplacedGlobal("x".to_string()))
        );
    }

    #[test]
    fn global_add_checks_both_scopes() {
        let mut table = SymbolTable::new();
        table.push_scope(program_owner());
        table
            .add(
                Identifier::scalar("x", DataType::Integer, Region::Local, 1),
                false,
            )
            .expect("local add");
        assert_eq!(
            table.add(
                Identifier::scalar("x", DataType::Float, Region::Global, 0),
                true
            ),
            Err(NameError::Duplicate("x".to_string()))
        );
    }

    #[test]
    fn location_of_selects_the_addressing_region() {
        let mut table = SymbolTable::new();
        table.push_scope(program_owner());
        table
            .add(
                Identifier::scalar("g", DataType::Integer, Region::Global, 0),
                true,
            )
            .expect("global add");
        table
            .add(
                Identifier::scalar("l", DataType::Integer, Region::Local, 1),
                false,
            )
            .expect("local add");
        table
            .add(
                Identifier::scalar("p", DataType::Integer, Region::Param, 1),
                false,
            )
            .expect("param add");
        assert_eq!(table.location_of("g"), Some(Region::Global));
        assert_eq!(table.location_of("l"), Some(Region::Local));
        assert_eq!(table.location_of("p"), Some(Region::Param));
        assert_eq!(table.location_of("missing"), None);
    }

    #[test]
    fn direction_of_enclosing_parameters() {
        let mut table = SymbolTable::new();
        table.push_scope(program_owner());
        let proc_id = Identifier {
            name: "inc".to_string(),
            ty: DataType::Procedure,
            storage: Storage::Label(3),
            params: Some(vec![
                Parameter {
                    name: "n".to_string(),
                    ty: DataType::Integer,
                    direction: ParamDirection::In,
                },
                Parameter {
                    name: "r".to_string(),
                    ty: DataType::Integer,
                    direction: ParamDirection::Out,
                },
            ]),
        };
        table.push_scope(proc_id);
        assert_eq!(table.direction_of("n"), Some(ParamDirection::In));
        assert_eq!(table.direction_of("r"), Some(ParamDirection::Out));
        assert_eq!(table.direction_of("z"), None);
        assert!(table.is_param("n"));
        assert!(!table.is_param("z"));
    }

    #[test]
    fn owner_tracks_the_active_scope() {
        let mut table = SymbolTable::new();
        assert!(table.current_owner().is_none());
        table.push_scope(program_owner());
        assert_eq!(table.current_owner().map(|o| o.name.as_str()), Some("main"));
        table.pop_scope();
        assert!(table.current_owner().is_none());
        // The global scope itself is never popped.
        table.pop_scope();
        assert!(table.find("anything").is_err());
    }
}
