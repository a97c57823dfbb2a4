use crate::types::NodeCategory;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct NodeDescriptor {
    pub type_name: String,
    pub name: String,
    pub description: String,
    pub category: NodeCategory,
}
