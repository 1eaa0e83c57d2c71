//! Symbol table for script names.

use std::collections::HashMap;

/// Interned symbol reference.
pub type SymId = u32;

/// Data bound to a script name.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum SymData {
    /// Name seen but nothing assigned.
    #[default]
    None,
    /// Numeric script variable.
    Num(f64),
    /// Labeled script object, by parser operator index.
    Obj(u32),
}

/// Interning symbol table. Ids are dense and stable for the table's life.
#[derive(Default)]
pub struct SymTab {
    map: HashMap<String, SymId>,
    names: Vec<String>,
    data: Vec<SymData>,
}

impl SymTab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning its id.
    pub fn intern(&mut self, name: &str) -> SymId {
        if let Some(&id) = self.map.get(name) {
            return id;
        }
        let id = self.names.len() as SymId;
        self.map.insert(name.to_string(), id);
        self.names.push(name.to_string());
        self.data.push(SymData::None);
        id
    }

    /// Name of an interned symbol.
    pub fn name(&self, id: SymId) -> &str {
        &self.names[id as usize]
    }

    /// Data bound to a symbol.
    pub fn data(&self, id: SymId) -> SymData {
        self.data[id as usize]
    }

    /// Bind data to a symbol, replacing any previous binding.
    pub fn bind(&mut self, id: SymId, data: SymData) {
        self.data[id as usize] = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable() {
        let mut st = SymTab::new();
        let a = st.intern("alpha");
        let b = st.intern("beta");
        assert_ne!(a, b);
        assert_eq!(st.intern("alpha"), a);
        assert_eq!(st.name(b), "beta");
    }

    #[test]
    fn binding() {
        let mut st = SymTab::new();
        let a = st.intern("x");
        assert_eq!(st.data(a), SymData::None);
        st.bind(a, SymData::Num(1.5));
        assert_eq!(st.data(a), SymData::Num(1.5));
    }
}
