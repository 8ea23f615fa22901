use serde::{Deserialize, Serialize};

/// Role carried by an already-authenticated caller. Token verification
/// happens upstream; the engine only does role and ownership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

impl Caller {
    pub fn student(id: i64) -> Self {
        Caller {
            id,
            role: Role::Student,
        }
    }

    pub fn instructor(id: i64) -> Self {
        Caller {
            id,
            role: Role::Instructor,
        }
    }
}
