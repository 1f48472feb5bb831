use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{required_name, FieldError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenreInput {
    pub name: String,
}

impl GenreInput {
    /// Returns the input with its name trimmed, or the field that is invalid.
    pub fn normalized(&self) -> Result<Self, FieldError> {
        Ok(Self {
            name: required_name("name", &self.name)?,
        })
    }
}
