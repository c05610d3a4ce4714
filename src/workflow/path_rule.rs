//! Path Rules
//!
//! A path rule computes the concrete file path of one out-port from the
//! resolved inputs and parameters of a single invocation. Rules only see a
//! read-only [`TaskView`], so resolving the same upstream state twice always
//! yields the same path.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use super::template::{CommandTemplate, Segment};
use super::token::Token;

/// Signature of a custom path function.
pub type PathFn = Arc<dyn Fn(&TaskView) -> String + Send + Sync>;

/// Read-only view of one invocation's resolved inputs and parameters.
#[derive(Debug, Clone, Default)]
pub struct TaskView {
    process: String,
    inputs: BTreeMap<String, Token>,
    params: BTreeMap<String, String>,
}

impl TaskView {
    pub fn new(
        process: impl Into<String>,
        inputs: BTreeMap<String, Token>,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            process: process.into(),
            inputs,
            params,
        }
    }

    /// Name of the process being resolved.
    pub fn process(&self) -> &str {
        &self.process
    }

    /// Path on an in-port, or `""` if the port holds no single file.
    pub fn in_path(&self, port: &str) -> &str {
        self.inputs
            .get(port)
            .and_then(|t| t.path())
            .unwrap_or_default()
    }

    /// All paths on an in-port (batch-aware).
    pub fn in_paths(&self, port: &str) -> Vec<&str> {
        self.inputs
            .get(port)
            .map(|t| t.flatten())
            .unwrap_or_default()
    }

    /// Value on a param-port, or `""` if absent.
    pub fn param(&self, port: &str) -> &str {
        self.params.get(port).map(String::as_str).unwrap_or_default()
    }

    pub fn input(&self, port: &str) -> Option<&Token> {
        self.inputs.get(port)
    }

    pub fn inputs(&self) -> &BTreeMap<String, Token> {
        &self.inputs
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }
}

/// Strategy for deriving an out-port path.
#[derive(Clone)]
pub enum PathRule {
    /// Fixed path
    Static(String),
    /// Upstream path with every occurrence of `search` replaced
    Replace {
        in_port: String,
        search: String,
        replace: String,
    },
    /// Path template using `{i:...}` and `{p:...}` placeholders
    Template(CommandTemplate),
    /// Arbitrary pure function of the task view
    Custom(PathFn),
}

impl PathRule {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&TaskView) -> String + Send + Sync + 'static,
    {
        PathRule::Custom(Arc::new(f))
    }

    /// The in-port a replace rule derives from.
    pub fn source_port(&self) -> Option<&str> {
        match self {
            PathRule::Replace { in_port, .. } => Some(in_port),
            _ => None,
        }
    }

    /// Resolves the rule. The error is a human-readable reason.
    pub fn resolve(&self, view: &TaskView) -> Result<String, String> {
        let path = match self {
            PathRule::Static(path) => path.clone(),
            PathRule::Replace {
                in_port,
                search,
                replace,
            } => {
                let token = view
                    .input(in_port)
                    .ok_or_else(|| format!("in-port '{}' has no resolved token", in_port))?;
                let upstream = token
                    .path()
                    .ok_or_else(|| format!("in-port '{}' does not hold a single file", in_port))?;
                if !upstream.contains(search.as_str()) {
                    return Err(format!(
                        "upstream path '{}' does not contain '{}'",
                        upstream, search
                    ));
                }
                upstream.replace(search.as_str(), replace)
            }
            PathRule::Template(template) => {
                // A path needs one file; batches only render through a join modifier
                for segment in template.segments() {
                    if let Segment::Input { name, join: None } = segment {
                        if let Some(Token::Batch(_)) = view.input(name) {
                            return Err(format!(
                                "in-port '{}' holds a batch where a single path is needed",
                                name
                            ));
                        }
                    }
                }
                template
                    .render(view.inputs(), view.params(), &HashMap::new())
                    .map_err(|e| e.to_string())?
            }
            PathRule::Custom(f) => f(view),
        };

        if path.trim().is_empty() {
            return Err("rule produced an empty path".to_string());
        }
        Ok(path)
    }
}

impl fmt::Debug for PathRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathRule::Static(path) => f.debug_tuple("Static").field(path).finish(),
            PathRule::Replace {
                in_port,
                search,
                replace,
            } => f
                .debug_struct("Replace")
                .field("in_port", in_port)
                .field("search", search)
                .field("replace", replace)
                .finish(),
            PathRule::Template(t) => f.debug_tuple("Template").field(&t.text()).finish(),
            PathRule::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_with_input(port: &str, path: &str) -> TaskView {
        let mut inputs = BTreeMap::new();
        inputs.insert(port.to_string(), Token::file(path, None));
        TaskView::new("realign_indels", inputs, BTreeMap::new())
    }

    #[test]
    fn test_static_rule() {
        let rule = PathRule::Static("tmp/tiny.intervals".to_string());
        assert_eq!(rule.resolve(&TaskView::default()).unwrap(), "tmp/tiny.intervals");
    }

    #[test]
    fn test_replace_rule() {
        let rule = PathRule::Replace {
            in_port: "bamnormal".to_string(),
            search: ".bam".to_string(),
            replace: ".real.bam".to_string(),
        };
        let view = view_with_input("bamnormal", "tmp/normal_0.md.bam");
        assert_eq!(rule.resolve(&view).unwrap(), "tmp/normal_0.md.real.bam");
        assert_eq!(rule.source_port(), Some("bamnormal"));
    }

    #[test]
    fn test_replace_rule_strips_suffix() {
        let rule = PathRule::Replace {
            in_port: "targz".to_string(),
            search: ".gz".to_string(),
            replace: String::new(),
        };
        let view = view_with_input("targz", "data/uppnex_apps.tar.gz");
        assert_eq!(rule.resolve(&view).unwrap(), "data/uppnex_apps.tar");
    }

    #[test]
    fn test_replace_rule_missing_input() {
        let rule = PathRule::Replace {
            in_port: "bam".to_string(),
            search: ".bam".to_string(),
            replace: ".x.bam".to_string(),
        };
        let err = rule.resolve(&TaskView::default()).unwrap_err();
        assert!(err.contains("no resolved token"));
    }

    #[test]
    fn test_replace_rule_search_not_found() {
        let rule = PathRule::Replace {
            in_port: "bam".to_string(),
            search: ".cram".to_string(),
            replace: ".x".to_string(),
        };
        let view = view_with_input("bam", "a.bam");
        assert!(rule.resolve(&view).unwrap_err().contains("does not contain"));
    }

    #[test]
    fn test_template_rule() {
        let template = CommandTemplate::parse("data/avg_rmsd/avg_rmsd_cost{p:cost}.txt").unwrap();
        let rule = PathRule::Template(template);
        let mut params = BTreeMap::new();
        params.insert("cost".to_string(), "0.5".to_string());
        let view = TaskView::new("avg_rmsd", BTreeMap::new(), params);
        assert_eq!(rule.resolve(&view).unwrap(), "data/avg_rmsd/avg_rmsd_cost0.5.txt");

        let template = CommandTemplate::parse("{i:orig}.ungz").unwrap();
        let rule = PathRule::Template(template);
        let view = view_with_input("orig", "train.gz");
        assert_eq!(rule.resolve(&view).unwrap(), "train.gz.ungz");
    }

    #[test]
    fn test_template_rule_rejects_batch_input() {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "bams".to_string(),
            Token::Batch(vec![Token::file("a.bam", None), Token::file("b.bam", None)]),
        );
        let view = TaskView::new("merge_bams", inputs, BTreeMap::new());

        let rule = PathRule::Template(CommandTemplate::parse("{i:bams}.merged").unwrap());
        let err = rule.resolve(&view).unwrap_err();
        assert!(err.contains("single path"));

        // An explicit join is still allowed
        let rule = PathRule::Template(CommandTemplate::parse("{i:bams|join:_}.merged").unwrap());
        assert_eq!(rule.resolve(&view).unwrap(), "a.bam_b.bam.merged");
    }

    #[test]
    fn test_custom_rule_captures_iteration_config() {
        let sample_type = String::from("normal");
        let rule = PathRule::custom(move |t| format!("tmp/{}_{}.bam", sample_type, t.param("index")));

        let mut params = BTreeMap::new();
        params.insert("index".to_string(), "4".to_string());
        let view = TaskView::new("align_samples_normal", BTreeMap::new(), params);

        assert_eq!(rule.resolve(&view).unwrap(), "tmp/normal_4.bam");
        // Same view, same answer
        assert_eq!(rule.resolve(&view).unwrap(), "tmp/normal_4.bam");
    }

    #[test]
    fn test_custom_rule_empty_result_is_error() {
        let rule = PathRule::custom(|t| t.in_path("missing").to_string());
        assert!(rule.resolve(&TaskView::default()).is_err());
    }

    #[test]
    fn test_view_accessors() {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "bams".to_string(),
            Token::Batch(vec![Token::file("a.bam", None), Token::file("b.bam", None)]),
        );
        let view = TaskView::new("merge", inputs, BTreeMap::new());
        assert_eq!(view.in_path("bams"), "");
        assert_eq!(view.in_paths("bams"), vec!["a.bam", "b.bam"]);
        assert_eq!(view.param("nope"), "");
        assert_eq!(view.process(), "merge");
    }

    #[test]
    fn test_debug_output() {
        let rule = PathRule::custom(|_| "x".to_string());
        assert_eq!(format!("{:?}", rule), "Custom(<fn>)");
    }
}
