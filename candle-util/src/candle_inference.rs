pub struct TrainConfig {
    pub learning_rate: f32,
    pub adam_epsilon: f64,
    pub batch_size: usize,
    pub updates_per_epoch: usize,
    pub num_epochs: usize,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl TrainConfig {
    /// Reject settings that would make the per-pixel bound undefined
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("batch size must be positive");
        }
        if self.updates_per_epoch == 0 {
            anyhow::bail!("updates per epoch must be positive");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            anyhow::bail!("learning rate must be positive: {}", self.learning_rate);
        }
        if !self.adam_epsilon.is_finite() || self.adam_epsilon <= 0.0 {
            anyhow::bail!("adam epsilon must be positive: {}", self.adam_epsilon);
        }
        Ok(())
    }
}

/// Epsilon for candle's `AdamW` at update `step` (1-based) such that
/// its bias-corrected update
///
///   lr * m_hat / (sqrt(v_hat) + eps)
///
/// equals the update with `eps_hat` added to the uncorrected moment
///
///   lr * sqrt(1 - beta2^t) / (1 - beta1^t) * m / (sqrt(v) + eps_hat)
///
pub fn uncorrected_adam_epsilon(eps_hat: f64, beta2: f64, step: usize) -> f64 {
    eps_hat / (1.0 - beta2.powf(step as f64)).sqrt()
}
