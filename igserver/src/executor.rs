//! The background generation job. One spawned future per task, owning copies
//! of everything it needs; the request handler returns before stage 1 runs.
//!
//! The four visible progress levels: 25 intake/reference normalization, 50
//! payload built, 75 model call done, 100 artifacts uploaded. Failures are
//! written to the task record and never surface through an HTTP response.

use std::sync::Arc;

use log::{error, info, warn};

use crate::Ctx;
use crate::api::parse_ref_inputs;
use crate::refimage::{self, FetchPolicy};
use crate::tasks::TaskOptions;

pub async fn run(
    ctx: Arc<Ctx>,
    task_id: String,
    prompt: String,
    options: TaskOptions,
    inputs: Vec<serde_json::Value>,
) {
    if let Err((progress, message)) = run_inner(&ctx, &task_id, &prompt, &options, &inputs).await {
        error!("task {task_id} failed at progress {progress}: {message}");
        ctx.tasks.fail(&task_id, progress, message).await;
    }
}

async fn run_inner(
    ctx: &Ctx,
    task_id: &str,
    prompt: &str,
    options: &TaskOptions,
    inputs: &[serde_json::Value],
) -> Result<(), (u8, String)> {
    // stage 1: normalize references
    ctx.tasks.mark_processing(task_id, 25).await;
    let parsed = parse_ref_inputs(inputs).map_err(|e| (25, format!("REF_IMAGE_INVALID: {e}")))?;
    let policy = FetchPolicy {
        allow_hosts: ctx.config.allow_ref_image_hosts.clone(),
        allow_http: ctx.config.allow_ref_image_http,
        max_bytes: ctx.config.max_ref_image_bytes,
    };
    let mut refs = Vec::with_capacity(parsed.len());
    for input in &parsed {
        match refimage::normalize(&ctx.http, &policy, input).await {
            Ok(r) => refs.push(r),
            Err(e) => return Err((25, format!("REF_IMAGE_INVALID: {e}"))),
        }
    }

    // stage 2: the payload is assembled inside the client call below; the
    // references being inline is what progress 50 reports
    ctx.tasks.set_progress(task_id, 50).await;

    // stage 3: model call on the next project in rotation
    let output = match ctx
        .vertex
        .generate(prompt, &options.aspect_ratio, &options.image_size, &refs)
        .await
    {
        Ok(output) => output,
        Err(e) => {
            // NoImage means the call itself went through, stage 3 completed
            let progress = match e {
                igvertex::Error::NoImage => 75,
                _ => 50,
            };
            return Err((progress, e.to_string()));
        }
    };
    info!("task {task_id} generated via project {}", output.project);
    ctx.tasks.set_progress(task_id, 75).await;

    // stage 4: persist artifacts and publish urls
    let mut urls = Vec::new();
    for image in output.images.iter().take(ctx.config.max_images_per_response.max(1)) {
        let payload = strip_data_prefix(&image.data);
        let bytes = match refimage::decode_base64(payload) {
            Some(bytes) => bytes,
            None => {
                warn!("task {task_id}: undecodable image payload from upstream, skipping");
                continue;
            }
        };
        let sha1 = igb2::sha1_hex(&bytes);
        let key = igb2::keys::object_key(&ctx.config.key_prefix, &image.mime_type);
        match ctx
            .b2
            .upload(&key, Some(&image.mime_type), bytes.into(), &sha1)
            .await
        {
            Ok(()) => urls.push(format!("{}/i/{}", ctx.config.img_return_base, key)),
            Err(e) => warn!("task {task_id}: upload of {key} failed: {e}"),
        }
    }
    if urls.is_empty() {
        return Err((75, "UPLOAD_FAILED".to_string()));
    }
    ctx.tasks.complete(task_id, urls).await;
    Ok(())
}

fn strip_data_prefix(data: &str) -> &str {
    match data.split_once(",") {
        Some((meta, payload)) if meta.starts_with("data:") => payload,
        _ => data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_data_prefix() {
        assert_eq!("QUJD", strip_data_prefix("data:image/png;base64,QUJD"));
        assert_eq!("QUJD", strip_data_prefix("QUJD"));
        // base64 with no data: meta keeps its commas untouched
        assert_eq!("a,b", strip_data_prefix("a,b"));
    }
}
