//! `FxHashMap`/`FxHashSet` aliases, used throughout the CFG passes wherever a
//! `HashMap`/`HashSet` keyed on `BlockId`/`Value` would otherwise be the
//! default: the SipHash-based std maps are needlessly resistant to
//! HashDoS for keys we generate ourselves, and rustc-style FxHash is cheap
//! and deterministic for that case.

pub type FxHashMap<K, V> = std::collections::HashMap<K, V, rustc_hash::FxBuildHasher>;
pub type FxHashSet<T> = std::collections::HashSet<T, rustc_hash::FxBuildHasher>;
