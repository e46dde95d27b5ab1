//! Resource locator: turns human tokens (`deploy`, `deploy.apps`,
//! `deployments.v1.apps`) into canonical identifiers using live metadata.
//!
//! Token grammar, by dot-segment count:
//! - 1: `resource`
//! - 2: `resource.group`
//! - 3+: `resource.version.group`, where the group is every remaining segment
//!   re-joined with `.` (groups such as `apps.example.com` contain dots)
//!
//! The second segment means "group" with two segments but "version" with three
//! or more. Existing token literals rely on this, so it stays.

use std::sync::Arc;

use tracing::debug;

use crate::{GlintError, GlintResult, MapperError, PartialResourceId, ResourceId, ResourceMapper};

/// Split a token into a partial identifier without consulting metadata.
pub fn parse_token(token: &str) -> GlintResult<PartialResourceId> {
    let parts: Vec<&str> = token.split('.').collect();
    match parts.as_slice() {
        [resource] => Ok(PartialResourceId::named(*resource)),
        [resource, group] => Ok(PartialResourceId { group: Some((*group).to_string()), version: None, resource: (*resource).to_string() }),
        [resource, version, rest @ ..] => {
            if version.is_empty() {
                return Err(GlintError::token(token, "empty version segment"));
            }
            if rest.len() > 1 && rest.iter().any(|s| s.is_empty()) {
                return Err(GlintError::token(token, "empty label in group"));
            }
            Ok(PartialResourceId { group: Some(rest.join(".")), version: Some((*version).to_string()), resource: (*resource).to_string() })
        }
        [] => Ok(PartialResourceId::named("")),
    }
}

/// Resolves tokens through an injected metadata resolver.
#[derive(Clone)]
pub struct Locator {
    mapper: Arc<dyn ResourceMapper>,
}

impl Locator {
    pub fn new(mapper: Arc<dyn ResourceMapper>) -> Self { Self { mapper } }

    pub fn mapper(&self) -> &Arc<dyn ResourceMapper> { &self.mapper }

    pub fn resolve(&self, token: &str) -> GlintResult<ResourceId> {
        let guess = parse_token(token)?;
        match self.mapper.resource_for(&guess) {
            Ok(id) => {
                debug!(token = %token, resource = %id, "resolved resource token");
                Ok(id)
            }
            Err(MapperError::NoMatch(_)) => Err(GlintError::ResourceNotFound(token.to_string())),
            Err(MapperError::Other(source)) => Err(GlintError::Resolve { token: token.to_string(), source }),
        }
    }

    /// Resolve every token, failing on the first one that does not resolve.
    pub fn resolve_many<S: AsRef<str>>(&self, tokens: &[S]) -> GlintResult<Vec<ResourceId>> {
        tokens.iter().map(|t| self.resolve(t.as_ref())).collect()
    }
}
