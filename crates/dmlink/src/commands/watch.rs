//! Watch subcommand handler: stream events until Ctrl-C or `--count`.

use futures_util::StreamExt;
use tracing::{debug, info};

use dmlink_core::{EventTarget, ObjectNode};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs, WatchEvent};
use crate::error::CliError;
use crate::output;

use super::util;

fn target(event: WatchEvent, name: Option<String>) -> Result<EventTarget, CliError> {
    let required = |what: &str| {
        name.clone().ok_or_else(|| CliError::Validation {
            field: "name".into(),
            reason: format!("--name <{what}> is required for this event kind"),
        })
    };
    Ok(match event {
        WatchEvent::Created => EventTarget::Created {
            child_type: required("CHILD_TYPE")?,
        },
        WatchEvent::Modified => EventTarget::Modified,
        WatchEvent::Deleted => EventTarget::Deleted,
        WatchEvent::Affected => EventTarget::Affected {
            subtype: name.clone(),
        },
        WatchEvent::AttributeChanged => EventTarget::AttributeChanged {
            attribute: required("ATTRIBUTE")?,
        },
        WatchEvent::CommandExecuted => EventTarget::CommandExecuted {
            command: required("COMMAND")?,
        },
    })
}

pub async fn handle(args: WatchArgs, root: &ObjectNode, global: &GlobalOpts) -> Result<(), CliError> {
    let object = util::resolve_object(root, &args.path)?;
    let mut stream = object.watch(target(args.event, args.name)?).await?;
    info!(tag = stream.subscription().tag(), "watching");

    // Events are one per line, so tables and pretty JSON collapse to
    // compact JSON here.
    let format = match global.output {
        OutputFormat::Yaml => OutputFormat::Yaml,
        OutputFormat::Plain => OutputFormat::Plain,
        _ => OutputFormat::JsonCompact,
    };

    let mut seen = 0usize;
    loop {
        if args.count.is_some_and(|limit| seen >= limit) {
            break;
        }
        tokio::select! {
            event = stream.next() => {
                let Some(event) = event else {
                    debug!("event stream ended");
                    break;
                };
                seen += 1;
                let line = output::render_single(&format, event.as_ref(), |_| String::new(), |e| e.tag.clone());
                output::print_output(&line, global.quiet);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    stream.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_needs_a_child_type() {
        assert!(matches!(
            target(WatchEvent::Created, None),
            Err(CliError::Validation { .. })
        ));
        assert_eq!(
            target(WatchEvent::Created, Some("TaskObject".into())).ok(),
            Some(EventTarget::Created {
                child_type: "TaskObject".into()
            })
        );
    }

    #[test]
    fn affected_subtype_is_optional() {
        assert_eq!(
            target(WatchEvent::Affected, None).ok(),
            Some(EventTarget::Affected { subtype: None })
        );
    }
}
