//! Image references used by ddev.

pub const IMAGE_TAG: &str = "v1.24.6";

pub const WEB_IMAGE: &str = "ddev/ddev-webserver:v1.24.6";
pub const ROUTER_IMAGE: &str = "ddev/ddev-traefik-router:v1.24.6";
pub const SSH_AGENT_IMAGE: &str = "ddev/ddev-ssh-agent:v1.24.6";
pub const UTILITIES_IMAGE: &str = "ddev/ddev-utilities:latest";
pub const MAILPIT_IMAGE: &str = "axllent/mailpit:v1.24";

/// Database server image for a `type:version` pair.
pub fn db_image(kind: &str, version: &str) -> String {
    match kind {
        "postgres" => format!("postgres:{}", version),
        _ => format!("ddev/ddev-dbserver-{}-{}:{}", kind, version, IMAGE_TAG),
    }
}

/// Split an image reference into `(repository, tag)`.
///
/// The tag is whatever follows the last `:` after the last `/`, so registry
/// ports (`localhost:5000/img`) are not mistaken for tags. Returns `None`
/// when there is no tag separator; the tag may be empty.
pub fn split_tag(image: &str) -> Option<(&str, &str)> {
    let image = image.split('@').next().unwrap_or(image);
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    let colon = image[name_start..].rfind(':')? + name_start;
    Some((&image[..colon], &image[colon + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_found_after_the_last_slash() {
        assert_eq!(split_tag("busybox:stable"), Some(("busybox", "stable")));
        assert_eq!(
            split_tag("localhost:5000/team/img:1.2"),
            Some(("localhost:5000/team/img", "1.2"))
        );
        assert_eq!(split_tag("localhost:5000/team/img"), None);
        assert_eq!(split_tag("busybox"), None);
        assert_eq!(split_tag("busybox:"), Some(("busybox", "")));
    }

    #[test]
    fn db_images() {
        assert_eq!(db_image("mariadb", "10.11"), "ddev/ddev-dbserver-mariadb-10.11:v1.24.6");
        assert_eq!(db_image("postgres", "16"), "postgres:16");
    }
}
