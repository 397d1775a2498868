#[cfg(test)]
mod tests {
    use super::super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Lance);
        assert_eq!(config.store.path, PathBuf::from("./data/biomedical"));
        assert_eq!(config.store.collection, "PuBMED_Central_Open_Access");
        assert_eq!(config.ingestion.archive_pattern, "*tar.gz");
        assert_eq!(config.ingestion.estimated_total, 30_000_000);
        assert!(config.ingestion.show_progress);
        assert_eq!(config.store.compact_every, pmcoa_db::DEFAULT_COMPACT_EVERY);
    }

    #[test]
    fn test_job_capacity_follows_worker_count() {
        let config = Config::parse("[ingestion]\nworkers = 5\n").unwrap();
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.workers, 5);
        assert_eq!(pipeline.job_capacity, 5);

        let config = Config::parse("[ingestion]\nworkers = 5\njob_capacity = 64\n").unwrap();
        assert_eq!(config.pipeline_config().job_capacity, 64);
    }

    #[test]
    fn test_default_workers_at_least_one() {
        let config = Config::parse("[ingestion]\nworker_fraction = 0.01\n").unwrap();
        assert!(config.pipeline_config().workers >= 1);
    }

    #[test]
    fn test_rejects_zero_sizes_and_bad_fraction() {
        assert!(Config::parse("[ingestion]\nworkers = 0\n").is_err());
        assert!(Config::parse("[ingestion]\njob_capacity = 0\n").is_err());
        assert!(Config::parse("[ingestion]\nworker_fraction = 0.0\n").is_err());
        assert!(Config::parse("[ingestion]\nworker_fraction = 1.5\n").is_err());
        assert!(Config::parse("[ingestion]\nworker_fraction = 1.0\n").is_ok());
        assert!(Config::parse("[store]\ncompact_every = 0\n").is_err());
    }

    #[test]
    fn test_memory_backend_and_unknown_backend() {
        let config = Config::parse("[store]\nbackend = \"memory\"\n").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(Config::parse("[store]\nbackend = \"mongo\"\n").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.ingestion.archive_dir, PathBuf::from("download_scripts"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pmcoa.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[store]\npath = \"/tmp/pmc\"\n\n[ingestion]\narchive_dir = \"/data/oa\"\nshow_progress = false").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/pmc"));
        assert_eq!(config.ingestion.archive_dir, PathBuf::from("/data/oa"));
        assert!(!config.ingestion.show_progress);
    }
}
