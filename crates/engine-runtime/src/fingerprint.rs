use engine_config::{job::JobSpec, settings::ValidatedSettings};

/// Stable digest of everything that decides which rows a checkpoint refers
/// to. A checkpoint taken under a different digest is not resumed from.
pub fn job_fingerprint(job: &JobSpec, settings: &ValidatedSettings) -> String {
    let table = &job.target.table;
    let business_key = table.business_key.join(",");
    let load_mode = settings.load_mode.to_string();
    let strategy = settings.checkpoint_strategy.to_string();

    let mut h = blake3::Hasher::new();
    for part in [
        job.job_id.as_str(),
        job.source.query.trim(),
        table.schema.as_deref().unwrap_or(""),
        table.name.as_str(),
        business_key.as_str(),
        load_mode.as_str(),
        strategy.as_str(),
        settings.checkpoint_column.as_deref().unwrap_or(""),
    ] {
        h.update(part.as_bytes());
        h.update(b":");
    }
    format!("job-{}", &h.finalize().to_hex()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::execution::load::LoadMode;

    fn job() -> JobSpec {
        JobSpec::from_json(
            r#"{
                "job_id": "orders",
                "source": { "dialect": "postgres", "query": "SELECT * FROM orders ORDER BY id" },
                "target": { "table": { "name": "orders", "business_key": ["id"] } }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let job = job();
        let settings = job.validate().unwrap();
        let a = job_fingerprint(&job, &settings);
        assert_eq!(a, job_fingerprint(&job, &settings));
        assert!(a.starts_with("job-"));
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_fingerprint_tracks_query_and_mode() {
        let job = job();
        let settings = job.validate().unwrap();
        let base = job_fingerprint(&job, &settings);

        let mut edited = job.clone();
        edited.source.query = "SELECT * FROM orders WHERE id > 5 ORDER BY id".into();
        assert_ne!(base, job_fingerprint(&edited, &settings));

        let mut upsert = settings.clone();
        upsert.load_mode = LoadMode::Upsert;
        assert_ne!(base, job_fingerprint(&job, &upsert));
    }
}
