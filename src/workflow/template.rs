//! Command Templates
//!
//! Parses command strings containing port placeholders and renders them
//! against the resolved values of one invocation.
//!
//! # Placeholders
//!
//! - `{i:name}` - path of the token on in-port `name`
//! - `{o:name}` - resolved path of out-port `name`
//! - `{p:name}` - value of the token on param-port `name`
//! - `{i:name:r:SEP}` / `{i:name|join:SEP}` - all paths of a batch token,
//!   joined with `SEP`
//!
//! Anything else in braces (e.g. shell `${fname%.bam}`) is copied verbatim.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::port::{PortDirection, PortSpec};
use super::token::Token;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([iop]):([A-Za-z0-9_]+)(?:(:r:|\|join:)([^}]*))?\}")
        .expect("placeholder pattern is valid")
});

/// Separator used when a batch is rendered without a join modifier.
const DEFAULT_JOIN: &str = " ";

/// A failure while rendering a template.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("no token on in-port '{0}'")]
    MissingInput(String),

    #[error("no value on param-port '{0}'")]
    MissingParam(String),

    #[error("no resolved path for out-port '{0}'")]
    MissingOutput(String),

    #[error("join modifier is only valid on in-ports (placeholder '{0}')")]
    JoinOnNonInput(String),
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Input { name: String, join: Option<String> },
    Output(String),
    Param(String),
}

/// A parsed command (or path) template.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    text: String,
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Parses a template string.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                segments.push(Segment::Literal(text[last..whole.start()].to_string()));
            }
            last = whole.end();

            let kind = &caps[1];
            let name = caps[2].to_string();
            let join = caps.get(4).map(|m| m.as_str().to_string());

            let segment = match (kind, join) {
                ("i", join) => Segment::Input { name, join },
                (_, Some(_)) => return Err(TemplateError::JoinOnNonInput(whole.as_str().to_string())),
                ("o", None) => Segment::Output(name),
                _ => Segment::Param(name),
            };
            segments.push(segment);
        }

        if last < text.len() {
            segments.push(Segment::Literal(text[last..].to_string()));
        }

        Ok(Self {
            text: text.to_string(),
            segments,
        })
    }

    /// The original template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Ports referenced by the template, in first-use order, without repeats.
    pub fn ports(&self) -> Vec<PortSpec> {
        let mut ports: Vec<PortSpec> = Vec::new();
        for segment in &self.segments {
            let (name, direction) = match segment {
                Segment::Input { name, .. } => (name, PortDirection::In),
                Segment::Output(name) => (name, PortDirection::Out),
                Segment::Param(name) => (name, PortDirection::ParamIn),
                Segment::Literal(_) => continue,
            };
            if !ports.iter().any(|p| &p.name == name && p.direction == direction) {
                ports.push(PortSpec {
                    name: name.clone(),
                    direction,
                });
            }
        }
        ports
    }

    /// True if the template references any out-port.
    pub fn has_outputs(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Output(_)))
    }

    /// Renders the template.
    ///
    /// `inputs` holds data tokens by in-port name, `params` parameter values
    /// by param-port name and `outputs` the rendered out-port paths.
    pub fn render(
        &self,
        inputs: &BTreeMap<String, Token>,
        params: &BTreeMap<String, String>,
        outputs: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        let mut rendered = String::with_capacity(self.text.len());

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Input { name, join } => {
                    let token = inputs
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingInput(name.clone()))?;
                    if join.is_some() || matches!(token, Token::Batch(_)) {
                        let sep = join.as_deref().unwrap_or(DEFAULT_JOIN);
                        rendered.push_str(&token.flatten().join(sep));
                    } else {
                        // Single tokens always have a string form
                        rendered.push_str(token.as_str().unwrap_or_default());
                    }
                }
                Segment::Output(name) => {
                    let path = outputs
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingOutput(name.clone()))?;
                    rendered.push_str(path);
                }
                Segment::Param(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingParam(name.clone()))?;
                    rendered.push_str(value);
                }
            }
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, Token)]) -> BTreeMap<String, Token> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_detects_ports() {
        let t = CommandTemplate::parse("zcat {i:targz} > {o:tar} # {p:runid} {i:targz}").unwrap();
        let ports = t.ports();
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[0].name, "targz");
        assert_eq!(ports[0].direction, PortDirection::In);
        assert_eq!(ports[1].direction, PortDirection::Out);
        assert_eq!(ports[2].direction, PortDirection::ParamIn);
        assert!(t.has_outputs());
    }

    #[test]
    fn test_same_name_in_and_out() {
        let t = CommandTemplate::parse("picard INPUT={i:bam} OUTPUT={o:bam}").unwrap();
        assert_eq!(t.ports().len(), 2);
    }

    #[test]
    fn test_render_single_values() {
        let t = CommandTemplate::parse("cp {i:orig} {o:copy} # {p:runid}").unwrap();
        let ins = inputs(&[("orig", Token::file("data/a.smi", None))]);
        let mut params = BTreeMap::new();
        params.insert("runid".to_string(), "testrun".to_string());
        let mut outs = HashMap::new();
        outs.insert("copy".to_string(), "data/testrun/a.smi".to_string());

        let cmd = t.render(&ins, &params, &outs).unwrap();
        assert_eq!(cmd, "cp data/a.smi data/testrun/a.smi # testrun");
    }

    #[test]
    fn test_render_join_modifiers() {
        let batch = Token::Batch(vec![
            Token::file("tmp/normal_1.bam", None),
            Token::file("tmp/normal_2.bam", None),
        ]);
        let ins = inputs(&[("bams", batch)]);
        let outs: HashMap<String, String> =
            [("mergedbam".to_string(), "tmp/normal.bam".to_string())].into();

        let t = CommandTemplate::parse("samtools merge -f {o:mergedbam} {i:bams:r: }").unwrap();
        assert_eq!(
            t.render(&ins, &BTreeMap::new(), &outs).unwrap(),
            "samtools merge -f tmp/normal.bam tmp/normal_1.bam tmp/normal_2.bam"
        );

        let t = CommandTemplate::parse("cat {i:bams|join:,}").unwrap();
        assert_eq!(
            t.render(&ins, &BTreeMap::new(), &outs).unwrap(),
            "cat tmp/normal_1.bam,tmp/normal_2.bam"
        );

        // Batches without a modifier are space-joined
        let t = CommandTemplate::parse("cat {i:bams}").unwrap();
        assert_eq!(
            t.render(&ins, &BTreeMap::new(), &outs).unwrap(),
            "cat tmp/normal_1.bam tmp/normal_2.bam"
        );
    }

    #[test]
    fn test_shell_braces_left_alone() {
        let text = "fname={o:recalbam}; mv $fname ${fname%.bam.tmp.bai}.bai";
        let t = CommandTemplate::parse(text).unwrap();
        let outs: HashMap<String, String> =
            [("recalbam".to_string(), "normal.recal.bam".to_string())].into();
        let cmd = t.render(&BTreeMap::new(), &BTreeMap::new(), &outs).unwrap();
        assert_eq!(cmd, "fname=normal.recal.bam; mv $fname ${fname%.bam.tmp.bai}.bai");
    }

    #[test]
    fn test_awk_braces_left_alone() {
        let t = CommandTemplate::parse("awk '{ c += $1; n++ } END { print c / n }' > {o:avg}").unwrap();
        assert_eq!(t.ports().len(), 1);
    }

    #[test]
    fn test_render_missing_values() {
        let t = CommandTemplate::parse("echo {i:x}").unwrap();
        assert_eq!(
            t.render(&BTreeMap::new(), &BTreeMap::new(), &HashMap::new()),
            Err(TemplateError::MissingInput("x".to_string()))
        );

        let t = CommandTemplate::parse("echo {p:cost}").unwrap();
        assert_eq!(
            t.render(&BTreeMap::new(), &BTreeMap::new(), &HashMap::new()),
            Err(TemplateError::MissingParam("cost".to_string()))
        );

        let t = CommandTemplate::parse("echo {o:out}").unwrap();
        assert_eq!(
            t.render(&BTreeMap::new(), &BTreeMap::new(), &HashMap::new()),
            Err(TemplateError::MissingOutput("out".to_string()))
        );
    }

    #[test]
    fn test_join_only_on_inputs() {
        let err = CommandTemplate::parse("echo {o:out:r: }").unwrap_err();
        assert!(matches!(err, TemplateError::JoinOnNonInput(_)));
    }

    #[test]
    fn test_plain_text_round_trips() {
        let t = CommandTemplate::parse("echo hello").unwrap();
        assert!(t.ports().is_empty());
        assert_eq!(t.segments(), &[Segment::Literal("echo hello".to_string())]);
        assert_eq!(t.text(), "echo hello");
    }
}
