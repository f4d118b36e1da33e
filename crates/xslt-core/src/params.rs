//! The top-level parameter map passed into a run (component §6), bound as global
//! variables before the first template fires. A caller-supplied parameter only takes
//! effect if the stylesheet declares a matching top-level `xsl:param`; unknown names are
//! ignored rather than rejected, matching `xsl:param`'s "caller may not know every
//! parameter a stylesheet accepts" contract.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    String(String),
    Number(f64),
    Boolean(bool),
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}
impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}
impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}
impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Boolean(b)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParamMap(HashMap<String, ParamValue>);

impl ParamMap {
    pub fn new() -> Self {
        ParamMap(HashMap::new())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> &mut Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }
}
