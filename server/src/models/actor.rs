use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{required_name, FieldError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Actor {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

impl Actor {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorInput {
    pub first_name: String,
    pub last_name: String,
}

impl ActorInput {
    pub fn normalized(&self) -> Result<Self, FieldError> {
        Ok(Self {
            first_name: required_name("first_name", &self.first_name)?,
            last_name: required_name("last_name", &self.last_name)?,
        })
    }
}
