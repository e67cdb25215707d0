use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

/// Where the API version travels: as a request header or inside the JSON body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPlacement {
    #[default]
    Header,
    Body,
}

/// One row of the model routing table.
///
/// Adding support for a model is a new row; call sites never branch on model names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelRoute {
    /// Matched against the requested model id; the longest matching prefix wins.
    pub model_prefix: String,
    /// Endpoint path appended to the base URL. `{model}` is replaced with the upstream id.
    pub path: String,
    pub api_version: String,
    #[serde(default)]
    pub version_placement: VersionPlacement,
    /// Whether the upstream model id is sent as the `model` body field.
    #[serde(default = "default_true")]
    pub model_in_body: bool,
    /// Namespace prefix removed from the requested id before it is sent upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Extra top-level fields merged into the request body.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra_payload: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl ModelRoute {
    fn messages_api(prefix: &str, max_output_tokens: Option<u32>) -> Self {
        Self {
            model_prefix: prefix.to_string(),
            path: "/v1/messages".to_string(),
            api_version: "2023-06-01".to_string(),
            version_placement: VersionPlacement::Header,
            model_in_body: true,
            strip_prefix: None,
            max_output_tokens,
            extra_payload: Map::new(),
        }
    }

    /// Model id as the provider expects it.
    pub fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        self.strip_prefix
            .as_deref()
            .and_then(|prefix| model.strip_prefix(prefix))
            .unwrap_or(model)
    }

    pub fn endpoint_path(&self, model: &str) -> String {
        self.path.replace("{model}", self.upstream_model(model))
    }
}

/// Table-driven model → endpoint selection.
#[derive(Clone, Debug)]
pub struct RouteTable {
    routes: Vec<ModelRoute>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RouteTable {
    /// Built-in rows. The row with the empty prefix is the fallback for unknown models.
    pub fn builtin() -> Self {
        let mut vertex = ModelRoute::messages_api("vertex/", Some(8192));
        vertex.path = "/v1/models/{model}:streamRawPredict".to_string();
        vertex.api_version = "vertex-2023-10-16".to_string();
        vertex.version_placement = VersionPlacement::Body;
        vertex.model_in_body = false;
        vertex.strip_prefix = Some("vertex/".to_string());

        let mut sonnet_37 = ModelRoute::messages_api("claude-3-7-sonnet", Some(16_000));
        sonnet_37
            .extra_payload
            .insert("temperature".to_string(), json!(0.3));

        Self {
            routes: vec![
                ModelRoute::messages_api("", None),
                ModelRoute::messages_api("claude-3-haiku", Some(4096)),
                ModelRoute::messages_api("claude-3-5-haiku", Some(8192)),
                ModelRoute::messages_api("claude-3-5-sonnet", Some(8192)),
                sonnet_37,
                ModelRoute::messages_api("claude-sonnet-4", Some(16_000)),
                ModelRoute::messages_api("claude-opus-4", Some(16_000)),
                vertex,
            ],
        }
    }

    /// Built-in rows plus configured ones. A configured row replaces a built-in row
    /// with the same prefix.
    pub fn with_routes(extra: impl IntoIterator<Item = ModelRoute>) -> Self {
        let mut table = Self::builtin();
        for route in extra {
            table.routes.retain(|r| r.model_prefix != route.model_prefix);
            table.routes.push(route);
        }
        table
    }

    pub fn routes(&self) -> &[ModelRoute] {
        &self.routes
    }

    /// Longest-prefix match, falling back to the empty-prefix row.
    pub fn resolve(&self, model: &str) -> &ModelRoute {
        let best = self
            .routes
            .iter()
            .filter(|r| model.starts_with(&r.model_prefix))
            .max_by_key(|r| r.model_prefix.len());

        match best {
            Some(route) => {
                if route.model_prefix.is_empty() {
                    warn!(model = %model, "No route registered for model, using default route");
                }
                route
            }
            // Unreachable while the empty-prefix row exists; a configured table could drop it.
            None => &self.routes[0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::builtin();
        let route = table.resolve("claude-3-7-sonnet-20250219");
        assert_eq!(route.model_prefix, "claude-3-7-sonnet");
        assert_eq!(route.max_output_tokens, Some(16_000));
        assert_eq!(route.extra_payload.get("temperature"), Some(&json!(0.3)));
    }

    #[test]
    fn test_unknown_model_uses_default_row() {
        let table = RouteTable::builtin();
        let route = table.resolve("some-new-model");
        assert_eq!(route.model_prefix, "");
        assert_eq!(route.path, "/v1/messages");
    }

    #[test]
    fn test_vertex_route_shapes_path_and_version() {
        let table = RouteTable::builtin();
        let route = table.resolve("vertex/claude-3-5-sonnet@20240620");
        assert_eq!(route.version_placement, VersionPlacement::Body);
        assert!(!route.model_in_body);
        assert_eq!(
            route.endpoint_path("vertex/claude-3-5-sonnet@20240620"),
            "/v1/models/claude-3-5-sonnet@20240620:streamRawPredict"
        );
    }

    #[test]
    fn test_configured_route_replaces_builtin() {
        let mut custom = ModelRoute::messages_api("claude-3-haiku", Some(1024));
        custom.path = "/proxy/messages".to_string();
        let table = RouteTable::with_routes([custom]);

        let route = table.resolve("claude-3-haiku-20240307");
        assert_eq!(route.path, "/proxy/messages");
        assert_eq!(
            table
                .routes()
                .iter()
                .filter(|r| r.model_prefix == "claude-3-haiku")
                .count(),
            1
        );
    }

    #[test]
    fn test_route_deserializes_with_defaults() {
        let route: ModelRoute = serde_json::from_value(json!({
            "model_prefix": "acme-",
            "path": "/v2/chat",
            "api_version": "2024-01-01"
        }))
        .unwrap();
        assert!(route.model_in_body);
        assert_eq!(route.version_placement, VersionPlacement::Header);
        assert!(route.extra_payload.is_empty());
    }
}
