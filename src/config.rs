use std::path::PathBuf;

use clap::Parser;

use crate::settings::YamlSettingsStore;
use crate::types::{Mark, MarkLabel};

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Prompted auto-labeling with Segment Anything", long_about = None)]
pub struct Config {
    /// Settings file holding the custom model list
    #[arg(long, default_value_os_t = YamlSettingsStore::default_path())]
    pub settings: PathBuf,

    /// Directory containing the built-in `models.yaml`
    #[arg(short, long)]
    pub resources: Option<PathBuf>,

    /// Model config file; registered as a custom model if it is not known yet
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Image to label
    #[arg(short, long)]
    pub image: Option<PathBuf>,

    /// Point prompt `x,y` (foreground) or `x,y,neg` (background)
    #[arg(short, long = "point", value_parser = parse_point)]
    pub points: Vec<Mark>,

    /// Box prompt `x1,y1,x2,y2`
    #[arg(long = "rect", value_parser = parse_rect)]
    pub rects: Vec<Mark>,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Print the registered models and exit
    #[arg(short, long)]
    pub list: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    /// Point prompts followed by box prompts.
    pub fn marks(&self) -> Vec<Mark> {
        self.points.iter().chain(&self.rects).cloned().collect()
    }
}

fn parse_numbers(s: &str, count: usize) -> Result<Vec<f64>, String> {
    let values = s
        .split(',')
        .take(count)
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| format!("`{}` is not a number", v.trim()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != count {
        return Err(format!("expected {} comma separated numbers in `{}`", count, s));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(format!("coordinates must be finite: `{}`", s));
    }
    Ok(values)
}

fn parse_point(s: &str) -> Result<Mark, String> {
    let parts: Vec<&str> = s.split(',').collect();
    let label = match parts.get(2).map(|p| p.trim()) {
        None | Some("pos") | Some("1") => MarkLabel::Positive,
        Some("neg") | Some("0") => MarkLabel::Negative,
        Some(other) => return Err(format!("unknown point label `{}`; use pos or neg", other)),
    };
    if parts.len() > 3 {
        return Err(format!("too many fields in `{}`", s));
    }
    let xy = parse_numbers(s, 2)?;
    Ok(Mark::point(xy[0], xy[1], label))
}

fn parse_rect(s: &str) -> Result<Mark, String> {
    if s.split(',').count() != 4 {
        return Err(format!("expected x1,y1,x2,y2 in `{}`", s));
    }
    let v = parse_numbers(s, 4)?;
    Ok(Mark::rectangle(v[0], v[1], v[2], v[3]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_defaults_to_foreground() {
        assert_eq!(
            parse_point("10,20").unwrap(),
            Mark::point(10.0, 20.0, MarkLabel::Positive)
        );
        assert_eq!(
            parse_point("1.5, 2,neg").unwrap(),
            Mark::point(1.5, 2.0, MarkLabel::Negative)
        );
    }

    #[test]
    fn malformed_prompts_are_rejected() {
        assert!(parse_point("10").is_err());
        assert!(parse_point("10,abc").is_err());
        assert!(parse_point("1,2,maybe").is_err());
        assert!(parse_rect("1,2,3").is_err());
        assert!(parse_rect("1,2,3,4,5").is_err());
        assert!(parse_rect("1,2,inf,4").is_err());
    }

    #[test]
    fn cli_collects_marks_in_order() {
        let config = Config::parse_from([
            "autolabel",
            "--image",
            "a.png",
            "--point",
            "1,2",
            "--rect",
            "0,0,5,5",
            "--point",
            "3,4,neg",
        ]);
        assert_eq!(
            config.marks(),
            vec![
                Mark::point(1.0, 2.0, MarkLabel::Positive),
                Mark::point(3.0, 4.0, MarkLabel::Negative),
                Mark::rectangle(0.0, 0.0, 5.0, 5.0),
            ]
        );
        assert_eq!(config.device_id, 0);
        assert!(!config.list);
    }
}
