use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("Cannot {} `{}` header, {}", operation, header, message)]
pub struct Error {
    message: &'static str,
    // which header this error comes from
    header: &'static str,
    // what operation was attempted
    operation: &'static str,
}

impl Error {
    /// Error when extracting a value from a carrier
    #[must_use]
    pub fn extract(message: &'static str, header: &'static str) -> Self {
        Self {
            message,
            header,
            operation: "extract",
        }
    }

    /// Error when injecting a value into a carrier
    #[must_use]
    pub fn inject(message: &'static str, header: &'static str) -> Self {
        Self {
            message,
            header,
            operation: "inject",
        }
    }

    #[must_use]
    pub fn header(&self) -> &'static str {
        self.header
    }
}
