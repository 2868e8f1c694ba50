use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Separator between a component and its sub-component in a leaf id,
/// e.g. `Theory/Written`.
pub const LEAF_SEPARATOR: char = '/';

/// Grade bands, highest first. Lower bounds are inclusive.
pub const GRADE_BANDS: [(f64, &str); 6] = [
    (90.0, "A+"),
    (80.0, "A"),
    (70.0, "B+"),
    (60.0, "B"),
    (50.0, "C"),
    (33.0, "D"),
];
pub const FAIL_GRADE: &str = "F";

/// Always a leaf. A nested `subComponents` field fails to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubComponent {
    pub name: String,
    pub max_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeComponent {
    pub name: String,
    pub max_marks: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_components: Vec<SubComponent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkingScheme {
    pub components: Vec<SchemeComponent>,
}

/// A component that marks are actually entered against.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaf {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub max_marks: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarkCell {
    pub obtained: Option<f64>,
    #[serde(default)]
    pub absent: bool,
}

impl MarkCell {
    pub fn scored(v: f64) -> Self {
        Self {
            obtained: Some(v),
            absent: false,
        }
    }

    pub fn absent() -> Self {
        Self {
            obtained: Some(0.0),
            absent: true,
        }
    }

    /// What this cell adds to the obtained total.
    pub fn contribution(&self) -> f64 {
        if self.absent {
            0.0
        } else {
            self.obtained.unwrap_or(0.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSummary {
    pub obtained: f64,
    pub max: f64,
    pub percentage: String,
    pub percentage_value: f64,
    pub grade: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarksError {
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("{component}: marks must be a finite number")]
    NotFinite { component: String },

    #[error("{component}: negative marks are not allowed ({obtained})")]
    Negative { component: String, obtained: f64 },

    #[error("{component}: {obtained} exceeds maximum of {max}")]
    ExceedsMax {
        component: String,
        obtained: f64,
        max: f64,
    },
}

impl MarksError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownComponent(_) => "unknown_component",
            Self::NotFinite { .. } => "not_finite",
            Self::Negative { .. } => "negative",
            Self::ExceedsMax { .. } => "exceeds_max",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemeError {
    #[error("marking scheme needs at least one component")]
    Empty,

    #[error("component name must not be empty")]
    EmptyName,

    #[error("component name {0:?} must not contain '/'")]
    ReservedChar(String),

    #[error("duplicate component name: {0}")]
    DuplicateName(String),

    #[error("{0}: max marks must be greater than zero")]
    NonPositiveMax(String),
}

impl MarkingScheme {
    pub fn leaves(&self) -> Vec<Leaf> {
        let mut out = Vec::new();
        for c in &self.components {
            if c.sub_components.is_empty() {
                out.push(Leaf {
                    id: c.name.clone(),
                    name: c.name.clone(),
                    parent: None,
                    max_marks: c.max_marks,
                });
                continue;
            }
            for s in &c.sub_components {
                out.push(Leaf {
                    id: format!("{}{}{}", c.name, LEAF_SEPARATOR, s.name),
                    name: s.name.clone(),
                    parent: Some(c.name.clone()),
                    max_marks: s.max_marks,
                });
            }
        }
        out
    }

    pub fn max_total(&self) -> f64 {
        self.leaves().iter().map(|l| l.max_marks).sum()
    }

    pub fn validate(&self) -> Result<(), SchemeError> {
        if self.components.is_empty() {
            return Err(SchemeError::Empty);
        }
        let mut seen = HashSet::new();
        for c in &self.components {
            check_name(&c.name)?;
            if !seen.insert(c.name.trim().to_ascii_lowercase()) {
                return Err(SchemeError::DuplicateName(c.name.clone()));
            }
            if c.sub_components.is_empty() {
                if c.max_marks <= 0.0 || !c.max_marks.is_finite() {
                    return Err(SchemeError::NonPositiveMax(c.name.clone()));
                }
                continue;
            }
            let mut seen_sub = HashSet::new();
            for s in &c.sub_components {
                check_name(&s.name)?;
                if !seen_sub.insert(s.name.trim().to_ascii_lowercase()) {
                    return Err(SchemeError::DuplicateName(format!(
                        "{}{}{}",
                        c.name, LEAF_SEPARATOR, s.name
                    )));
                }
                if s.max_marks <= 0.0 || !s.max_marks.is_finite() {
                    return Err(SchemeError::NonPositiveMax(format!(
                        "{}{}{}",
                        c.name, LEAF_SEPARATOR, s.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_name(name: &str) -> Result<(), SchemeError> {
    if name.trim().is_empty() {
        return Err(SchemeError::EmptyName);
    }
    if name.contains(LEAF_SEPARATOR) {
        return Err(SchemeError::ReservedChar(name.to_string()));
    }
    Ok(())
}

/// Used when no scheme has been defined for a class/subject.
pub fn default_scheme() -> MarkingScheme {
    MarkingScheme {
        components: vec![
            SchemeComponent {
                name: "Theory".to_string(),
                max_marks: 70.0,
                sub_components: Vec::new(),
            },
            SchemeComponent {
                name: "Practical".to_string(),
                max_marks: 30.0,
                sub_components: Vec::new(),
            },
        ],
    }
}

pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn grade_for(percentage: f64) -> &'static str {
    GRADE_BANDS
        .iter()
        .find(|(floor, _)| percentage >= *floor)
        .map(|(_, g)| *g)
        .unwrap_or(FAIL_GRADE)
}

pub fn summarize(obtained: f64, max: f64) -> MarkSummary {
    let percentage_value = if max > 0.0 {
        round_2_decimals(obtained / max * 100.0)
    } else {
        0.0
    };
    MarkSummary {
        obtained,
        max,
        percentage: format!("{:.2}", percentage_value),
        percentage_value,
        grade: grade_for(percentage_value).to_string(),
    }
}

/// Cells are keyed by leaf id. Cells for ids outside the scheme are ignored.
pub fn aggregate(cells: &HashMap<String, MarkCell>, scheme: &MarkingScheme) -> MarkSummary {
    let mut obtained = 0.0;
    let mut max = 0.0;
    for leaf in scheme.leaves() {
        max += leaf.max_marks;
        if let Some(cell) = cells.get(&leaf.id) {
            obtained += cell.contribution();
        }
    }
    summarize(obtained, max)
}

/// Checks one manually entered cell against its leaf. Absent cells are
/// normalized to obtained = 0.
pub fn validate_cell(leaf: &Leaf, cell: MarkCell) -> Result<MarkCell, MarksError> {
    if cell.absent {
        return Ok(MarkCell::absent());
    }
    let Some(v) = cell.obtained else {
        return Ok(cell);
    };
    if !v.is_finite() {
        return Err(MarksError::NotFinite {
            component: leaf.id.clone(),
        });
    }
    if v < 0.0 {
        return Err(MarksError::Negative {
            component: leaf.id.clone(),
            obtained: v,
        });
    }
    if v > leaf.max_marks {
        return Err(MarksError::ExceedsMax {
            component: leaf.id.clone(),
            obtained: v,
            max: leaf.max_marks,
        });
    }
    Ok(cell)
}

pub fn find_leaf<'a>(leaves: &'a [Leaf], id: &str) -> Result<&'a Leaf, MarksError> {
    leaves
        .iter()
        .find(|l| l.id == id)
        .ok_or_else(|| MarksError::UnknownComponent(id.to_string()))
}
