use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// Parse `--seeds` tokens. Every scenario run is reproducible from its seed.
pub fn parse_seeds(tokens: &[String]) -> Result<Vec<u64>> {
    tokens
        .iter()
        .map(|token| {
            token
                .parse::<u64>()
                .with_context(|| format!("invalid seed '{token}'"))
        })
        .collect()
}

/// Fixed wall-clock origin for logic scenarios, so boost expiry checks do not
/// depend on when the tester runs.
pub fn scenario_epoch() -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(1_704_067_200, 0).context("scenario epoch out of range")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_filters() {
        let parts = split_csv(" smoke, ,reload-race,  jitter-drift ");
        assert_eq!(parts, vec!["smoke", "reload-race", "jitter-drift"]);
    }

    #[test]
    fn parse_seeds_rejects_garbage() {
        let seeds = parse_seeds(&split_csv("1, 42,1337")).unwrap();
        assert_eq!(seeds, vec![1, 42, 1337]);

        let err = parse_seeds(&split_csv("7,CL-ORANGE")).unwrap_err();
        assert!(err.to_string().contains("CL-ORANGE"));
    }
}
