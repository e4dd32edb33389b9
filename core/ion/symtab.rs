use std::collections::HashMap;

pub type Symbol = u32;

/// Largest symbol id the field-access opcodes can encode.
pub const MAX_SYMBOL_ID: Symbol = (1 << 21) - 1;

const SYSTEM_SYMBOLS: [&str; 9] = [
    "$ion",
    "$ion_1_0",
    "$ion_symbol_table",
    "name",
    "version",
    "imports",
    "symbols",
    "max_id",
    "$ion_shared_symbol_table",
];

/// Symbol table mapping field names to ids.
///
/// Ids 1..=9 are the ION system symbols; user symbols are assigned in
/// first-seen order after that.
#[derive(Debug, Clone)]
pub struct Symtab {
    interned: Vec<String>,
    memo: HashMap<String, Symbol>,
    // bumped on every new symbol; compiled programs compare against it
    generation: u64,
}

impl Default for Symtab {
    fn default() -> Self {
        Self::new()
    }
}

impl Symtab {
    pub fn new() -> Self {
        let mut st = Symtab {
            interned: Vec::with_capacity(SYSTEM_SYMBOLS.len() + 1),
            memo: HashMap::new(),
            generation: 0,
        };
        // id 0 is reserved
        st.interned.push(String::new());
        for s in SYSTEM_SYMBOLS {
            st.intern(s);
        }
        st.generation = 0;
        st
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&id) = self.memo.get(s) {
            return id;
        }
        let id = self.interned.len() as Symbol;
        self.interned.push(s.to_string());
        self.memo.insert(s.to_string(), id);
        self.generation += 1;
        id
    }

    /// Looks up an existing symbol without interning it.
    pub fn symbolize(&self, s: &str) -> Option<Symbol> {
        self.memo.get(s).copied()
    }

    pub fn get(&self, id: Symbol) -> Option<&str> {
        if id == 0 {
            return None;
        }
        self.interned.get(id as usize).map(|s| s.as_str())
    }

    pub fn maxId(&self) -> Symbol {
        (self.interned.len() - 1) as Symbol
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_order() {
        let mut st = Symtab::new();
        assert_eq!(st.maxId(), 9);
        let z = st.intern("z");
        let a = st.intern("a");
        let m = st.intern("m");
        assert_eq!((z, a, m), (10, 11, 12));
        assert_eq!(st.intern("a"), a);
        assert_eq!(st.get(a), Some("a"));
        assert_eq!(st.symbolize("q"), None);
        assert_eq!(st.symbolize("name"), Some(4));
        assert_eq!(st.generation(), 3);
    }
}
