use crate::tensor::Tensor;

/// Attribute payload attached to a node under a name.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Floats(Vec<f64>),
    String(String),
    Tensor(Tensor),
}

/// Discriminant of an [`Attribute`], used when only the kind matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Int,
    Ints,
    Float,
    Floats,
    String,
    Tensor,
}

impl Attribute {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Attribute::Int(_) => AttributeKind::Int,
            Attribute::Ints(_) => AttributeKind::Ints,
            Attribute::Float(_) => AttributeKind::Float,
            Attribute::Floats(_) => AttributeKind::Floats,
            Attribute::String(_) => AttributeKind::String,
            Attribute::Tensor(_) => AttributeKind::Tensor,
        }
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::Int(value)
    }
}

impl From<Vec<i64>> for Attribute {
    fn from(values: Vec<i64>) -> Self {
        Attribute::Ints(values)
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Attribute::Float(value)
    }
}

impl From<Vec<f64>> for Attribute {
    fn from(values: Vec<f64>) -> Self {
        Attribute::Floats(values)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_string())
    }
}

impl From<Tensor> for Attribute {
    fn from(tensor: Tensor) -> Self {
        Attribute::Tensor(tensor)
    }
}
