use std::fmt;

/// Identity of an apply's correlation: the right side reads the current left row through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplyParameterId(pub u32);

impl fmt::Display for ApplyParameterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ap{}", self.0)
    }
}

/// Key of a runtime query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamKey {
    /// A captured variable, bound by the caller on every execution.
    Named(String),
    /// A column of an outer row, bound by the materializer when a nested
    /// sequence is enumerated.
    Outer {
        parameter: ApplyParameterId,
        index: usize,
    },
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Named(name) => write!(f, "@{}", name),
            ParamKey::Outer { parameter, index } => write!(f, "@{}_{}", parameter, index),
        }
    }
}

/// Counters for the names and ids handed out during one translation.
///
/// Each translation owns its generator, so concurrent translations never share state.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next_alias: u32,
    next_column: u32,
    next_parameter: u32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next table alias (`a0`, `a1`, ...).
    pub fn next_alias(&mut self) -> String {
        let alias = format!("a{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    /// Next generated column name (`c0`, `c1`, ...).
    pub fn next_column(&mut self) -> String {
        let name = format!("c{}", self.next_column);
        self.next_column += 1;
        name
    }

    /// Next apply parameter.
    pub fn next_apply_parameter(&mut self) -> ApplyParameterId {
        let id = ApplyParameterId(self.next_parameter);
        self.next_parameter += 1;
        id
    }
}
