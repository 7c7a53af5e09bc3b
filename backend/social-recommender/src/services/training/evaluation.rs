use crate::error::{AppError, Result};
use crate::models::EvalMetrics;
use crate::services::dataset::RatingStream;
use crate::services::scoring::Scorer;

/// Score a whole partition and compute RMSE/MAE over every prediction.
///
/// Errors are computed on the concatenated predictions, never averaged per
/// batch: RMSE does not decompose over batches of unequal size.
pub fn evaluate<S: Scorer + ?Sized>(scorer: &S, stream: &RatingStream) -> Result<EvalMetrics> {
    if stream.is_empty() {
        return Err(AppError::MalformedData(
            "cannot evaluate on an empty partition".to_string(),
        ));
    }

    let mut predictions = Vec::with_capacity(stream.len());
    let mut targets = Vec::with_capacity(stream.len());
    for batch in stream.batches(0) {
        let out = scorer.forward(&batch.users, &batch.items)?;
        if out.len() != batch.len() {
            return Err(AppError::Model(format!(
                "scorer returned {} predictions for {} pairs",
                out.len(),
                batch.len()
            )));
        }
        predictions.extend(out.iter().copied());
        targets.extend(batch.labels);
    }

    Ok(error_metrics(&predictions, &targets))
}

/// RMSE and MAE of aligned predictions and targets. Empty input yields zeros.
pub fn error_metrics(predictions: &[f32], targets: &[f32]) -> EvalMetrics {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return EvalMetrics { rmse: 0.0, mae: 0.0 };
    }
    let (sq, abs) = predictions
        .iter()
        .zip(targets)
        .fold((0.0_f64, 0.0_f64), |(sq, abs), (&p, &t)| {
            let d = p as f64 - t as f64;
            (sq + d * d, abs + d.abs())
        });
    EvalMetrics {
        rmse: (sq / n as f64).sqrt(),
        mae: abs / n as f64,
    }
}
