use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::values::type_names::{DATE, STRING, TIMESTAMP};

/// Generated subclass suffixes left behind by proxying ORMs and bytecode
/// enhancers, e.g. `Order$HibernateProxy$x9Ab` or `Order_$$_javassist_12`.
static PROXY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\$\$Enhancer|\$HibernateProxy|\$Proxy|_\$\$_).*$").expect("valid proxy suffix pattern")
});

/// Type names that were written by older releases and have a current
/// equivalent.
const BUILT_IN_RENAMES: &[(&str, &str)] = &[
    ("org.joda.time.LocalDate", DATE),
    ("org.joda.time.DateTime", TIMESTAMP),
    ("org.joda.time.LocalDateTime", TIMESTAMP),
    ("java.util.GregorianCalendar", TIMESTAMP),
    ("java.lang.Character", STRING),
];

/// Cleans up stored value type names before they reach the value registry.
#[derive(Clone, Debug)]
pub struct TypeNameNormalizer {
    renames: BTreeMap<String, String>,
}

impl TypeNameNormalizer {
    /// Built-in renames, overridden by `configured` where both name the
    /// same type. Chains such as `a -> b`, `b -> c` are collapsed so every
    /// name maps straight to the end of its chain.
    pub fn new(configured: &BTreeMap<String, String>) -> Self {
        let mut direct: BTreeMap<String, String> = BUILT_IN_RENAMES
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        direct.extend(configured.iter().map(|(k, v)| (k.clone(), v.clone())));
        let renames = direct
            .keys()
            .map(|from| (from.clone(), end_of_chain(&direct, from)))
            .collect();
        Self { renames }
    }

    /// A renamed type whose chain leads back to itself, if any.
    pub fn rename_cycle(&self) -> Option<&str> {
        self.renames
            .values()
            .find(|to| self.renames.contains_key(to.as_str()))
            .map(String::as_str)
    }

    pub fn normalize(&self, type_name: &str) -> String {
        let stripped = PROXY_SUFFIX.replace(type_name, "");
        match self.renames.get(stripped.as_ref()) {
            Some(current) => current.clone(),
            None => stripped.into_owned(),
        }
    }
}

/// Follows `from` through `renames` until a name without a rename, or the
/// first name seen twice.
fn end_of_chain(renames: &BTreeMap<String, String>, from: &str) -> String {
    let mut seen = BTreeSet::from([from]);
    let mut current = from;
    while let Some(next) = renames.get(current) {
        if !seen.insert(next.as_str()) {
            break;
        }
        current = next;
    }
    current.to_string()
}

impl Default for TypeNameNormalizer {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}
