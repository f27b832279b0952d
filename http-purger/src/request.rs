//! Turns invalidations into concrete outbound requests.

use crate::config::{Header, PurgerSettings, RequestMethod};
use crate::errors::{BuildError, ValidationError};
use crate::invalidation::{Invalidation, InvalidationTypes, StatusPolicy, TypeRule};
use std::borrow::Cow;
use url::Url;

/// Placeholders a path template may reference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    /// The invalidation target, or the joined targets of a bundle
    Target,
    /// The invalidation type name
    Type,
}

impl Token {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "target" => Some(Token::Target),
            "type" => Some(Token::Type),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Token::Target => "target",
            Token::Type => "type",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// A parsed path such as `/purge/{type}/{target}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidPathTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut rest = template;
        while !rest.is_empty() {
            match rest.find(['{', '}']) {
                Some(pos) if rest[pos..].starts_with('}') => {
                    return Err(invalid("unmatched '}'"));
                }
                Some(pos) => {
                    if pos > 0 {
                        segments.push(Segment::Literal(rest[..pos].to_string()));
                    }
                    let after = &rest[pos + 1..];
                    let end = after.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
                    let name = &after[..end];
                    let token = Token::from_name(name)
                        .ok_or_else(|| invalid(&format!("unknown token {{{name}}}")))?;
                    segments.push(Segment::Token(token));
                    rest = &after[end + 1..];
                }
                None => {
                    segments.push(Segment::Literal(rest.to_string()));
                    rest = "";
                }
            }
        }

        Ok(PathTemplate { segments })
    }

    pub fn uses(&self, token: Token) -> bool {
        self.segments.contains(&Segment::Token(token))
    }

    /// Substitutes tokens; a token `lookup` cannot supply fails the render.
    /// Token values are escaped so they cannot end the path or the query.
    fn render<'a>(&self, lookup: impl Fn(Token) -> Option<&'a str>) -> Result<String, BuildError> {
        let mut path = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => path.push_str(literal),
                Segment::Token(token) => {
                    let value =
                        lookup(*token).ok_or_else(|| BuildError::MissingToken(token.name().into()))?;
                    path.push_str(&escape_token(value));
                }
            }
        }
        Ok(path)
    }
}

// `#` would start a fragment and `?` a query, both silently dropping part of
// the target. Everything else is left to `Url::parse`.
fn escape_token(value: &str) -> Cow<'_, str> {
    if !value.contains(['#', '?']) {
        return Cow::Borrowed(value);
    }
    let mut escaped = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        match c {
            '#' => escaped.push_str("%23"),
            '?' => escaped.push_str("%3F"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}

/// A fully built outbound request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurgeRequest {
    pub method: RequestMethod,
    pub url: Url,
    /// In configured order; duplicates are kept
    pub headers: Vec<Header>,
}

/// Builds requests for one purger instance from its (validated) settings.
#[derive(Clone, Debug)]
pub struct RequestBuilder {
    invalidation_type: String,
    template: PathTemplate,
    base_url: String,
    method: RequestMethod,
    headers: Vec<Header>,
    separator: String,
    types: InvalidationTypes,
}

impl RequestBuilder {
    pub fn new(
        settings: &PurgerSettings,
        types: InvalidationTypes,
    ) -> Result<Self, ValidationError> {
        Ok(RequestBuilder {
            invalidation_type: settings.invalidation_type.clone(),
            template: PathTemplate::parse(&settings.path)?,
            base_url: settings.base_url(),
            method: settings.request_method,
            headers: settings.headers.clone(),
            separator: settings.bundle_separator.clone(),
            types,
        })
    }

    /// Success policy of the configured invalidation type.
    pub fn status_policy(&self) -> StatusPolicy {
        self.types
            .get(&self.invalidation_type)
            .map(|rule| rule.accept.clone())
            .unwrap_or_default()
    }

    /// Checks that `job` can be handled by this purger and returns its type rule.
    fn check(&self, job: &Invalidation) -> Result<&TypeRule, BuildError> {
        let rule = self
            .types
            .get(&job.r#type)
            .ok_or_else(|| BuildError::UnknownType(job.r#type.clone()))?;

        if job.r#type != self.invalidation_type {
            return Err(BuildError::UnsupportedType(job.r#type.clone()));
        }

        if rule.takes_target && job.target.is_empty() {
            return Err(BuildError::EmptyTarget(job.r#type.clone()));
        }

        Ok(rule)
    }

    /// Builds the request for a single invalidation.
    pub fn build(&self, job: &Invalidation) -> Result<PurgeRequest, BuildError> {
        let rule = self.check(job)?;
        let path = self.template.render(|token| match token {
            Token::Type => Some(job.r#type.as_str()),
            Token::Target if rule.takes_target => Some(job.target.as_str()),
            Token::Target => None,
        })?;
        self.finish(&path)
    }

    /// Checks a job for inclusion in a bundle without building a request.
    pub fn check_bundled(&self, job: &Invalidation) -> Result<(), BuildError> {
        let rule = self.check(job)?;
        if !rule.takes_target && self.template.uses(Token::Target) {
            return Err(BuildError::MissingToken(Token::Target.name().into()));
        }
        Ok(())
    }

    /// Builds one request covering every job in `jobs`; `{target}` becomes the
    /// targets joined by the bundle separator. Jobs must have passed `check_bundled`.
    pub fn build_bundle(&self, jobs: &[&Invalidation]) -> Result<PurgeRequest, BuildError> {
        let targets = jobs
            .iter()
            .map(|job| job.target.as_str())
            .collect::<Vec<_>>()
            .join(&self.separator);
        let path = self.template.render(|token| match token {
            Token::Type => Some(self.invalidation_type.as_str()),
            Token::Target => Some(targets.as_str()),
        })?;
        self.finish(&path)
    }

    fn finish(&self, path: &str) -> Result<PurgeRequest, BuildError> {
        let raw = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        let url = Url::parse(&raw).map_err(|e| BuildError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        Ok(PurgeRequest {
            method: self.method,
            url,
            headers: self.headers.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(settings: PurgerSettings) -> RequestBuilder {
        RequestBuilder::new(&settings, InvalidationTypes::default()).unwrap()
    }

    fn url_settings(path: &str) -> PurgerSettings {
        PurgerSettings {
            id: "test".into(),
            invalidation_type: "url".into(),
            hostname: "example.com".into(),
            port: 8080,
            path: path.into(),
            request_method: RequestMethod::Purge,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_template() {
        assert!(PathTemplate::parse("/").is_ok());
        assert!(PathTemplate::parse("/{type}/{target}?x=1").is_ok());
        assert!(PathTemplate::parse("/{target").is_err());
        assert!(PathTemplate::parse("/target}").is_err());
        assert!(PathTemplate::parse("/{url}").is_err());

        let template = PathTemplate::parse("/purge/{target}").unwrap();
        assert!(template.uses(Token::Target));
        assert!(!template.uses(Token::Type));
    }

    #[test]
    fn test_build_url() {
        let builder = builder(url_settings("/{target}"));
        let request = builder.build(&Invalidation::new("url", "node/1")).unwrap();

        assert_eq!(request.url.as_str(), "http://example.com:8080/node/1");
        assert_eq!(request.method, RequestMethod::Purge);
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_target_cannot_escape_path() {
        let builder = builder(url_settings("/{target}"));

        let request = builder
            .build(&Invalidation::new("url", "node/1#comments"))
            .unwrap();
        assert_eq!(request.url.path(), "/node/1%23comments");
        assert_eq!(request.url.fragment(), None);

        let request = builder.build(&Invalidation::new("url", "search?q=1")).unwrap();
        assert_eq!(request.url.path(), "/search%3Fq=1");
        assert_eq!(request.url.query(), None);
    }

    #[test]
    fn test_target_in_query_stays_in_query() {
        let builder = builder(url_settings("/purge?t={target}"));
        let request = builder.build(&Invalidation::new("url", "a?b#c")).unwrap();
        assert_eq!(request.url.path(), "/purge");
        assert_eq!(request.url.query(), Some("t=a%3Fb%23c"));
        assert_eq!(request.url.fragment(), None);
    }

    #[test]
    fn test_bundle_targets_escaped() {
        let settings = PurgerSettings {
            invalidation_type: "tag".into(),
            ..url_settings("/tags/{target}")
        };
        let builder = builder(settings);
        let a = Invalidation::new("tag", "a#1");
        let b = Invalidation::new("tag", "b?2");
        let request = builder.build_bundle(&[&a, &b]).unwrap();
        assert_eq!(request.url.path(), "/tags/a%231,b%3F2");
        assert_eq!(request.url.query(), None);
    }

    #[test]
    fn test_build_path_without_leading_slash() {
        let builder = builder(url_settings("node/1"));
        let request = builder.build(&Invalidation::new("url", "ignored")).unwrap();
        assert_eq!(request.url.as_str(), "http://example.com:8080/node/1");
    }

    #[test]
    fn test_build_type_token() {
        let builder = builder(url_settings("/purge/{type}?t={target}"));
        let request = builder.build(&Invalidation::new("url", "abc")).unwrap();
        assert_eq!(request.url.as_str(), "http://example.com:8080/purge/url?t=abc");
    }

    #[test]
    fn test_headers_kept_in_order_with_duplicates() {
        let settings = PurgerSettings {
            headers: vec![
                Header::new("X-Foo", "bar"),
                Header::new("Cache-Tags", "a"),
                Header::new("X-Foo", "baz"),
            ],
            ..url_settings("/")
        };
        let request = builder(settings)
            .build(&Invalidation::new("url", "x"))
            .unwrap();

        let names: Vec<_> = request.headers.iter().map(|h| h.field.as_str()).collect();
        assert_eq!(names, ["X-Foo", "Cache-Tags", "X-Foo"]);
    }

    #[test]
    fn test_build_errors() {
        let builder = builder(url_settings("/{target}"));

        assert_eq!(
            builder.build(&Invalidation::new("nonsense", "x")),
            Err(BuildError::UnknownType("nonsense".into()))
        );
        assert_eq!(
            builder.build(&Invalidation::new("tag", "x")),
            Err(BuildError::UnsupportedType("tag".into()))
        );
        assert_eq!(
            builder.build(&Invalidation::new("url", "")),
            Err(BuildError::EmptyTarget("url".into()))
        );
    }

    #[test]
    fn test_missing_target_token() {
        let settings = PurgerSettings {
            invalidation_type: "everything".into(),
            ..url_settings("/{target}")
        };
        let builder = builder(settings);
        assert_eq!(
            builder.build(&Invalidation::new("everything", "")),
            Err(BuildError::MissingToken("target".into()))
        );
    }

    #[test]
    fn test_everything_without_target() {
        let settings = PurgerSettings {
            invalidation_type: "everything".into(),
            request_method: RequestMethod::Ban,
            ..url_settings("/")
        };
        let request = builder(settings)
            .build(&Invalidation::new("everything", ""))
            .unwrap();
        assert_eq!(request.url.as_str(), "http://example.com:8080/");
    }

    #[test]
    fn test_build_bundle() {
        let settings = PurgerSettings {
            invalidation_type: "tag".into(),
            bundle_separator: ",".into(),
            ..url_settings("/tags/{target}")
        };
        let builder = builder(settings);
        let a = Invalidation::new("tag", "node:1");
        let b = Invalidation::new("tag", "user:2");
        assert!(builder.check_bundled(&a).is_ok());

        let request = builder.build_bundle(&[&a, &b]).unwrap();
        assert_eq!(request.url.path(), "/tags/node:1,user:2");
    }

    #[test]
    fn test_status_policy_from_registry() {
        let types = InvalidationTypes::with_overrides(vec![TypeRule {
            name: "url".into(),
            takes_target: true,
            accept: StatusPolicy::Codes(vec![200, 404]),
        }])
        .unwrap();
        let builder = RequestBuilder::new(&url_settings("/"), types).unwrap();
        assert_eq!(builder.status_policy(), StatusPolicy::Codes(vec![200, 404]));
    }
}
