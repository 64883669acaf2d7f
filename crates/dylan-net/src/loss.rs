//! Objective and metrics over the class scores, for use by a training loop.

use candle_core::{DType, Tensor, D};
use dylan_core::{Error, Result};

fn check_targets(logits: &Tensor, targets: &Tensor) -> Result<usize> {
    let (batch, classes) = logits.dims2()?;
    let n = targets.dims1()?;
    if n != batch {
        return Err(Error::ShapeMismatch {
            context: "class targets",
            expected: vec![batch],
            actual: vec![n],
        });
    }
    Ok(classes)
}

/// Mean cross-entropy of raw scores [batch, classes] against class indices [batch]
pub fn cross_entropy(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    check_targets(logits, targets)?;
    Ok(candle_nn::loss::cross_entropy(logits, &targets.to_dtype(DType::U32)?)?)
}

/// Fraction of samples whose arg-max class equals the target
pub fn accuracy(logits: &Tensor, targets: &Tensor) -> Result<f32> {
    check_targets(logits, targets)?;
    let predicted = logits.argmax(D::Minus1)?;
    let correct = predicted
        .eq(&targets.to_dtype(DType::U32)?)?
        .to_dtype(DType::F32)?
        .mean_all()?;
    Ok(correct.to_scalar::<f32>()?)
}

/// Counts indexed by `[target][predicted]`
pub fn confusion_matrix(logits: &Tensor, targets: &Tensor) -> Result<Vec<Vec<usize>>> {
    let classes = check_targets(logits, targets)?;
    let predicted = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
    let targets = targets.to_dtype(DType::U32)?.to_vec1::<u32>()?;

    let mut matrix = vec![vec![0usize; classes]; classes];
    for (&t, &p) in targets.iter().zip(predicted.iter()) {
        let t = t as usize;
        if t >= classes {
            return Err(Error::InvalidConfig(format!(
                "target class {t} outside {classes} classes"
            )));
        }
        matrix[t][p as usize] += 1;
    }
    Ok(matrix)
}
