use serde::{Deserialize, Serialize};

/// A point in original-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Whether a point prompt marks foreground or background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum MarkLabel {
    Positive,
    Negative,
}

impl MarkLabel {
    /// Label value understood by the prompt decoder.
    pub const fn decoder_value(self) -> f32 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => 0.0,
        }
    }
}

impl TryFrom<i32> for MarkLabel {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Positive),
            0 => Ok(Self::Negative),
            other => Err(format!("unknown mark label {other}, expected 0 or 1")),
        }
    }
}

impl From<MarkLabel> for i32 {
    fn from(label: MarkLabel) -> Self {
        match label {
            MarkLabel::Positive => 1,
            MarkLabel::Negative => 0,
        }
    }
}

/// A user-supplied spatial hint in original-image pixel space.
///
/// Serialized as `{type: point, data: [x, y], label: 1}` or
/// `{type: rectangle, data: [x1, y1, x2, y2]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mark {
    Point { data: [f64; 2], label: MarkLabel },
    Rectangle { data: [f64; 4] },
}

impl Mark {
    pub const fn point(x: f64, y: f64, label: MarkLabel) -> Self {
        Self::Point {
            data: [x, y],
            label,
        }
    }

    pub const fn rectangle(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::Rectangle {
            data: [x1, y1, x2, y2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Polygon,
}

/// A closed polygon annotation produced by a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub label: String,
    pub points: Vec<Point>,
    pub shape_type: ShapeType,
    pub closed: bool,
    pub line_color: String,
    pub fill_color: String,
    pub line_width: u32,
    pub selected: bool,
    pub flags: std::collections::BTreeMap<String, bool>,
}

impl Shape {
    pub const UNKNOWN_LABEL: &'static str = "unknown";

    /// Closed polygon with default styling; the first point is repeated at the end.
    pub fn closed_polygon(mut points: Vec<Point>) -> Self {
        if let Some(&first) = points.first() {
            if points.last() != Some(&first) || points.len() == 1 {
                points.push(first);
            }
        }
        Self {
            label: Self::UNKNOWN_LABEL.to_string(),
            points,
            shape_type: ShapeType::Polygon,
            closed: true,
            line_color: "#000000".to_string(),
            fill_color: "#000000".to_string(),
            line_width: 1,
            selected: false,
            flags: Default::default(),
        }
    }
}

/// UI affordances a loaded engine supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Run,
    AddPoint,
    RemovePoint,
    AddRect,
    Undo,
    Clear,
    FinishObject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub actions: Vec<Action>,
}

impl Capabilities {
    pub fn new(actions: impl IntoIterator<Item = Action>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
        }
    }

    pub fn supports(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    /// Prompted segmentation needs at least point placement.
    pub fn supports_prompts(&self) -> bool {
        self.supports(Action::AddPoint)
    }
}
