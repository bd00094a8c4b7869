use super::chain::{ResponseBodyTransformer, ResponseHead};
use anyhow::{anyhow, Result};
use hyper::StatusCode;
use rhai::{Dynamic, Engine, Map, Scope, AST};
use std::sync::Arc;

const MAX_OPERATIONS: u64 = 1_000_000;

/// Response body rewriter backed by a Rhai script.
///
/// The script sees a `response` map with `status`, `headers` and `body` and
/// edits it in place:
///
/// ```rhai
/// response.body = response.body.to_lower();
/// response.headers["x-rewritten"] = "yes";
/// ```
#[derive(Clone)]
pub struct ScriptRewriter {
    engine: Arc<Engine>,
    ast: Arc<AST>,
}

impl ScriptRewriter {
    pub fn compile(code: &str) -> Result<Self> {
        let engine = Self::create_engine();
        let ast = engine
            .compile(code)
            .map_err(|e| anyhow!("Failed to compile script: {e}"))?;
        Ok(Self {
            engine: Arc::new(engine),
            ast: Arc::new(ast),
        })
    }

    fn create_engine() -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine
    }

    fn response_map(head: &ResponseHead, body: &str) -> Map {
        let mut headers = Map::new();
        for name in head.headers.keys() {
            if let Some(value) = head.header(name.as_str()) {
                headers.insert(name.as_str().into(), Dynamic::from(value.to_string()));
            }
        }

        let mut response = Map::new();
        response.insert("status".into(), Dynamic::from(head.status.as_u16() as i64));
        response.insert("headers".into(), Dynamic::from(headers));
        response.insert("body".into(), Dynamic::from(body.to_string()));
        response
    }
}

impl ResponseBodyTransformer for ScriptRewriter {
    fn transform(&self, head: &mut ResponseHead, body: &str) -> Result<Option<String>> {
        // Headers whose values are not text never reach the script, so
        // their absence from the map afterwards is not a removal.
        let exposed: Vec<String> = head
            .headers
            .keys()
            .filter(|name| head.header(name.as_str()).is_some())
            .map(|name| name.as_str().to_string())
            .collect();

        let mut scope = Scope::new();
        scope.push("response", Self::response_map(head, body));

        self.engine
            .run_ast_with_scope(&mut scope, &self.ast)
            .map_err(|e| anyhow!("Script execution error: {e}"))?;

        let response = scope
            .get_value::<Map>("response")
            .ok_or_else(|| anyhow!("Script replaced 'response' with a non-map value"))?;

        if let Some(status) = response.get("status").and_then(|v| v.as_int().ok()) {
            let status = u16::try_from(status)
                .ok()
                .and_then(|s| StatusCode::from_u16(s).ok())
                .ok_or_else(|| anyhow!("Script set invalid status {status}"))?;
            head.status = status;
        }

        if let Some(headers) = response
            .get("headers")
            .and_then(|v| v.clone().try_cast::<Map>())
        {
            for name in exposed {
                if !headers.contains_key(name.as_str()) {
                    head.remove_header(&name);
                }
            }
            for (name, value) in headers {
                let value = value
                    .clone()
                    .try_cast::<String>()
                    .unwrap_or_else(|| value.to_string());
                if head.header(name.as_str()) != Some(value.as_str()) {
                    head.set_header(name.as_str(), &value)?;
                }
            }
        }

        let new_body = response
            .get("body")
            .and_then(|v| v.clone().try_cast::<String>());
        Ok(new_body.filter(|b| b != body))
    }
}
