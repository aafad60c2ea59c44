//! Text skill dispatch via task-file handoff.
//!
//! The coordinator never calls a language model itself. It writes a
//! self-contained task description to `tasks/{skill}.md` and polls
//! `outputs/{skill}.json` until a result newer than the task file
//! appears, then hydrates the brand document. A rejected result is
//! consumed and the skill is re-dispatched with a hint naming the
//! missing fields, up to the configured retry limit.

use std::path::Path;
use std::time::SystemTime;

use serde_json::Value;

use super::ExecCtx;
use crate::catalog::SkillDefinition;
use crate::error::PipelineError;
use crate::fsutil;

const HEARTBEAT_SECS: i64 = 30;

/// Consecutive polls a fresh-but-unparsable result may persist before
/// the attempt fails. One or two covers a writer caught mid-write.
const MALFORMED_POLL_LIMIT: u32 = 3;

enum Poll {
    Ready(Value),
    NotReady,
    Malformed(String),
}

pub(super) async fn run_text_skill(ctx: &ExecCtx, id: &str) -> Result<(), PipelineError> {
    let def = ctx.skill(id)?;
    let task_path = ctx.config.tasks_dir().join(format!("{id}.md"));
    let output_path = ctx.config.outputs_dir().join(format!("{id}.json"));
    let timeout = ctx.config.effective_timeout();

    let mut hint: Option<Vec<String>> = None;
    for attempt in 0..=ctx.config.max_retries {
        ctx.check_cancelled()?;
        if attempt > 0 {
            ctx.state.bump_retry(id, ctx.clock.now())?;
        }
        write_task_file(ctx, def, &task_path, &output_path, hint.as_deref())?;
        ctx.state.mark_dispatched(id, ctx.clock.now())?;
        tracing::info!(
            target: "brandloom::executor",
            skill = %id,
            attempt,
            task = %task_path.display(),
            "text skill dispatched"
        );

        match wait_for_result(ctx, id, &task_path, &output_path, timeout).await {
            Ok(result) => {
                let hydrated = {
                    let mut doc = ctx.document.lock().map_err(|e| {
                        PipelineError::internal(format!("document lock poisoned: {e}"))
                    })?;
                    doc.hydrate(def, &result)
                };
                match hydrated {
                    Ok(fields) => {
                        ctx.state.mark_completed(id, ctx.clock.now())?;
                        tracing::info!(
                            target: "brandloom::executor",
                            skill = %id,
                            fields,
                            "text skill completed"
                        );
                        return Ok(());
                    }
                    Err(PipelineError::SkillOutputInvalid { missing_fields, .. }) => {
                        tracing::warn!(
                            target: "brandloom::executor",
                            skill = %id,
                            missing = ?missing_fields,
                            "result rejected, missing declared fields"
                        );
                        ctx.state.mark_failed(
                            id,
                            &format!(
                                "output missing required fields: {}",
                                missing_fields.join(", ")
                            ),
                            ctx.clock.now(),
                        )?;
                        // Consume the rejected result so the retry does
                        // not re-read it.
                        let _ = std::fs::remove_file(&output_path);
                        hint = Some(missing_fields);
                    }
                    Err(other) => return Err(other),
                }
            }
            Err(PipelineError::SkillTimeout { waited_secs, .. }) => {
                tracing::warn!(
                    target: "brandloom::executor",
                    skill = %id,
                    waited_secs,
                    "text skill timed out"
                );
                ctx.state.mark_failed(
                    id,
                    &format!("no result within {waited_secs}s"),
                    ctx.clock.now(),
                )?;
            }
            Err(PipelineError::SkillResultMalformed { reason, .. }) => {
                tracing::warn!(
                    target: "brandloom::executor",
                    skill = %id,
                    reason = %reason,
                    "text skill result unparsable"
                );
                ctx.state.mark_failed(
                    id,
                    &format!("result is not valid JSON: {reason}"),
                    ctx.clock.now(),
                )?;
                // Consume the bad file; a retry starts clean.
                let _ = std::fs::remove_file(&output_path);
            }
            Err(other) => return Err(other),
        }
    }
    // Retries exhausted; the failed state already stands.
    Ok(())
}

/// Poll for a result file newer than the task file.
async fn wait_for_result(
    ctx: &ExecCtx,
    id: &str,
    task_path: &Path,
    output_path: &Path,
    timeout: std::time::Duration,
) -> Result<Value, PipelineError> {
    let task_mtime = std::fs::metadata(task_path)?.modified()?;
    let deadline = ctx.clock.now() + chrono::Duration::milliseconds(timeout.as_millis() as i64);
    let mut last_beat = ctx.clock.now();
    let mut malformed_polls: u32 = 0;

    loop {
        ctx.check_cancelled()?;
        match read_fresh_result(output_path, task_mtime)? {
            Poll::Ready(result) => return Ok(result),
            Poll::NotReady => malformed_polls = 0,
            Poll::Malformed(reason) => {
                malformed_polls += 1;
                if malformed_polls >= MALFORMED_POLL_LIMIT {
                    return Err(PipelineError::SkillResultMalformed {
                        skill: id.to_string(),
                        reason,
                    });
                }
            }
        }
        let now = ctx.clock.now();
        if now >= deadline {
            return Err(PipelineError::SkillTimeout {
                skill: id.to_string(),
                waited_secs: timeout.as_secs(),
            });
        }
        if ctx.config.headless && (now - last_beat).num_seconds() >= HEARTBEAT_SECS {
            tracing::info!(
                target: "brandloom::executor",
                skill = %id,
                remaining_secs = (deadline - now).num_seconds(),
                "still waiting for text skill result"
            );
            last_beat = now;
        }
        ctx.clock.sleep(ctx.config.poll_interval).await;
    }
}

/// A result counts only when it postdates the task handoff. A fresh
/// file that does not parse is reported as malformed so the caller can
/// tell a stuck writer from an absent one.
fn read_fresh_result(
    output_path: &Path,
    task_mtime: SystemTime,
) -> Result<Poll, PipelineError> {
    let meta = match std::fs::metadata(output_path) {
        Ok(meta) => meta,
        Err(_) => return Ok(Poll::NotReady),
    };
    if meta.modified()? < task_mtime {
        return Ok(Poll::NotReady);
    }
    let text = match std::fs::read_to_string(output_path) {
        Ok(text) => text,
        Err(_) => return Ok(Poll::NotReady),
    };
    match serde_json::from_str(&text) {
        Ok(value) => Ok(Poll::Ready(value)),
        Err(err) => Ok(Poll::Malformed(err.to_string())),
    }
}

fn write_task_file(
    ctx: &ExecCtx,
    def: &SkillDefinition,
    task_path: &Path,
    output_path: &Path,
    missing_hint: Option<&[String]>,
) -> Result<(), PipelineError> {
    let mut body = String::new();
    body.push_str(&format!("# Task: {}\n\n", def.display_name()));
    body.push_str(&format!("Category: {}\n\n", def.category));
    body.push_str("## Brief\n\n");
    body.push_str(&def.description);
    body.push('\n');
    if let Some(extra) = ctx.overrides.get(&def.id) {
        body.push_str("\n## Additional context\n\n");
        body.push_str(extra);
        body.push('\n');
    }
    body.push_str(&format!(
        "\n## Required output\n\nWrite a JSON result to `{}` containing:\n\n",
        output_path.display()
    ));
    for field in &def.output_fields {
        let req = if field.required { "required" } else { "optional" };
        body.push_str(&format!("- `{}` ({req})\n", field.source));
    }
    if let Some(missing) = missing_hint {
        body.push_str(&format!(
            "\n## Previous attempt\n\nThe last result was missing: {}. \
             Include these fields this time.\n",
            missing.join(", ")
        ));
    }
    fsutil::atomic_write(task_path, body.as_bytes())?;
    Ok(())
}
