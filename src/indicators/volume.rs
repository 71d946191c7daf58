/// Latest volume relative to the mean of the preceding `period` volumes
///
/// The latest volume is excluded from the average. Returns 1.0 when there is
/// not enough history or the average is zero.
pub fn calculate_volume_ratio(volumes: &[f64], period: usize) -> f64 {
    if period == 0 || volumes.len() < period + 1 {
        return 1.0;
    }

    let current = volumes[volumes.len() - 1];
    let history = &volumes[volumes.len() - 1 - period..volumes.len() - 1];
    let avg_volume = history.iter().sum::<f64>() / period as f64;

    if avg_volume > 0.0 {
        current / avg_volume
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_ratio_excludes_latest() {
        let mut volumes = vec![999.0]; // outside the window
        volumes.extend(vec![100.0; 14]);
        volumes.push(250.0);

        assert!((calculate_volume_ratio(&volumes, 14) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_volume_ratio_defaults() {
        assert_eq!(calculate_volume_ratio(&[100.0; 10], 14), 1.0);
        assert_eq!(calculate_volume_ratio(&[0.0; 20], 14), 1.0);
    }
}
