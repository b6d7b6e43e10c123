use std::fmt;

use super::DispatchError;

/// A parsed `namespace:function` identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    pub namespace: &'a str,
    pub function: &'a str,
}

impl<'a> Target<'a> {
    /// Split on the first `:`; the function part may itself contain `:`
    pub fn parse(raw: &'a str) -> Result<Self, DispatchError> {
        raw.split_once(':')
            .map(|(namespace, function)| Target {
                namespace,
                function,
            })
            .ok_or_else(|| DispatchError::MalformedTarget(raw.to_string()))
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.function)
    }
}
