//! Capability derivation.
//!
//! A job's required capabilities come from its step images. Runners declare
//! the tags they offer and only receive jobs whose requirements they cover.

use std::collections::BTreeSet;

use crate::job::Job;

/// Required by every job: the runner can start containers at all.
pub const BASE_CAPABILITY: &str = "container-runtime";

pub const WINDOWS_CAPABILITY: &str = "image-windows";
pub const ARM64_CAPABILITY: &str = "arch-arm64";
pub const GPU_CAPABILITY: &str = "gpu";
pub const DIND_CAPABILITY: &str = "docker-in-docker";

/// The capability set a runner needs to execute `job`.
pub fn required_capabilities(job: &Job) -> BTreeSet<String> {
    let mut required = BTreeSet::new();
    required.insert(BASE_CAPABILITY.to_string());
    for step in &job.steps {
        required.extend(image_capabilities(&step.image));
    }
    required
}

/// Capability tags implied by a single image reference.
pub fn image_capabilities(image: &str) -> Vec<String> {
    let image = image.trim().to_ascii_lowercase();
    let mut tags = Vec::new();

    if ["windows", "nanoserver", "servercore"]
        .iter()
        .any(|marker| image.contains(marker))
    {
        tags.push(WINDOWS_CAPABILITY.to_string());
    }
    if image.starts_with("arm64v8/") {
        tags.push(ARM64_CAPABILITY.to_string());
    }
    if image.starts_with("nvidia/") || image.contains("cuda") {
        tags.push(GPU_CAPABILITY.to_string());
    }
    let (repository, tag) = split_reference(&image);
    if (repository == "docker" || repository.ends_with("/docker")) && tag.contains("dind") {
        tags.push(DIND_CAPABILITY.to_string());
    }

    tags
}

/// Split `registry/name:tag` into repository and tag, ignoring a registry port.
fn split_reference(image: &str) -> (&str, &str) {
    let image = image.split('@').next().unwrap_or(image);
    let last_slash = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_slash..].rfind(':') {
        Some(colon) => {
            let split = last_slash + colon;
            (&image[..split], &image[split + 1..])
        }
        None => (image, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobSpec, StepSpec};

    fn job_with_images(images: &[&str]) -> Job {
        Job::from_spec(JobSpec {
            name: "caps".to_string(),
            steps: images
                .iter()
                .map(|image| StepSpec {
                    name: image.to_string(),
                    image: image.to_string(),
                    commands: vec!["true".to_string()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    }

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plain_images_need_only_the_base_tag() {
        let job = job_with_images(&["alpine:3.20", "rust:1.85", "ghcr.io/org/tool:v1"]);
        assert_eq!(required_capabilities(&job), set(&[BASE_CAPABILITY]));
    }

    #[test]
    fn test_windows_image() {
        let job = job_with_images(&["windows/nanoserver"]);
        assert_eq!(
            required_capabilities(&job),
            set(&[BASE_CAPABILITY, WINDOWS_CAPABILITY])
        );
        let job = job_with_images(&["mcr.microsoft.com/windows/servercore:ltsc2022"]);
        assert!(required_capabilities(&job).contains(WINDOWS_CAPABILITY));
    }

    #[test]
    fn test_tags_accumulate_across_steps() {
        let job = job_with_images(&["arm64v8/alpine", "nvidia/cuda:12.2.0-base", "docker:27-dind"]);
        assert_eq!(
            required_capabilities(&job),
            set(&[
                BASE_CAPABILITY,
                ARM64_CAPABILITY,
                GPU_CAPABILITY,
                DIND_CAPABILITY
            ])
        );
    }

    #[test]
    fn test_docker_cli_image_is_not_dind() {
        assert!(image_capabilities("docker:27").is_empty());
        assert!(image_capabilities("localhost:5000/docker").is_empty());
        assert_eq!(
            image_capabilities("localhost:5000/library/docker:dind"),
            vec![DIND_CAPABILITY.to_string()]
        );
    }

    #[test]
    fn test_derivation_is_case_insensitive() {
        assert_eq!(
            image_capabilities("Windows/NanoServer"),
            vec![WINDOWS_CAPABILITY.to_string()]
        );
    }
}
