//! `echo`: repeats its input.
//!
//! ```toml
//! kind = "echo"
//! allow_external = ["echo"]
//!
//! [config]
//! template = "🔊 {}"
//! ```

use std::sync::Arc;

use serde::Deserialize;

use haruka_framework::prelude::*;

pub const DESCRIPTOR: ModuleDescriptor = ModuleDescriptor {
    name: "echo",
    trust: Trust::User,
    summary: "Repeats the command input",
    create,
};

#[derive(Debug, Default, Deserialize)]
struct EchoConfig {
    /// `{}` is replaced by the input.
    #[serde(default)]
    template: Option<String>,
}

fn create(manifest: &ModuleManifest) -> Result<ModuleDefinition, BoxError> {
    let config: EchoConfig = manifest.config();
    let template: Arc<str> = config.template.unwrap_or_else(|| "{}".to_string()).into();
    if !template.contains("{}") {
        return Err("echo template must contain {}".into());
    }

    Ok(ModuleDefinition::new().command(
        CommandMeta::new(
            "echo",
            handler_fn(move |ctx: Arc<CommandContext>| {
                let template = Arc::clone(&template);
                async move {
                    if ctx.input().is_empty() {
                        ctx.err("Nothing to echo").await?;
                    } else {
                        ctx.respond(&template.replace("{}", ctx.input())).await?;
                    }
                    Ok::<_, BoxError>(())
                }
            }),
        )
        .describe("Sends the text after the command back.")
        .usage("echo <text>"),
    ))
}

#[cfg(test)]
mod tests {
    use crate::builtin::testing::Harness;
    use haruka_core::MessageEvent;
    use haruka_framework::{DispatchOutcome, IgnoreReason};

    #[tokio::test]
    async fn test_echo_keeps_raw_input() {
        let h = Harness::new(&[("echo", "kind = \"echo\"\n")]).await;
        h.run(".echo \"hi there\"").await;
        assert_eq!(h.transport.last(), "\"hi there\"");

        h.run(".echo").await;
        assert_eq!(h.transport.last(), "⛔ Error: Nothing to echo");
    }

    #[tokio::test]
    async fn test_template_and_external_access() {
        let h = Harness::new(&[(
            "loud",
            "kind = \"echo\"\nallow_external = [\"echo\"]\n[config]\ntemplate = \"🔊 {}\"\n",
        )])
        .await;

        let outcome = h
            .dispatcher
            .dispatch(MessageEvent::new(10, 77, 43, ".echo hey", false))
            .await;
        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(h.transport.last(), "🔊 hey");
    }

    #[tokio::test]
    async fn test_external_blocked_without_flag() {
        let h = Harness::new(&[("echo", "kind = \"echo\"\n")]).await;
        let outcome = h
            .dispatcher
            .dispatch(MessageEvent::new(10, 77, 43, ".echo hey", false))
            .await;
        assert_eq!(outcome, DispatchOutcome::Ignored(IgnoreReason::NotPermitted));
    }
}
