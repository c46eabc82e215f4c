use chrono::Local;
use rand::Rng;

const RAND_SUFFIX_LEN: usize = 4;

/// Stamp a fresh `{data_dir}/{yyyymmdd_HHMMSS}_{rand4}` remote working
/// directory path, where `rand4` is four lowercase ASCII letters.
///
/// Called once per submission; the random suffix is what makes two
/// submissions with identical label/metadata/engine produce distinct
/// `remote_folder` values.
pub fn remote_folder(data_dir: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let suffix = random_lowercase_suffix();
    format!("{data_dir}/{timestamp}_{suffix}")
}

fn random_lowercase_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..RAND_SUFFIX_LEN)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_data_dir_timestamp_and_suffix() {
        let folder = remote_folder("/data");
        assert!(folder.starts_with("/data/"));

        // "/data/{yyyymmdd}_{HHMMSS}_{rand4}"
        let rest = folder.strip_prefix("/data/").unwrap();
        let parts: Vec<&str> = rest.split('_').collect();
        assert_eq!(parts.len(), 3, "expected date_time_suffix, got {rest:?}");
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        let suffix = parts[2];
        assert_eq!(suffix.len(), RAND_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn two_stamps_differ() {
        let a = remote_folder("/data");
        let b = remote_folder("/data");
        assert_ne!(a, b);
    }
}
