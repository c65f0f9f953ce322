//! Multi-TE ASL dataset: image + timing metadata + volume ordering.
//!
//! Volume ordering is described by an order string listing dimensions from
//! fastest to slowest varying:
//!
//! - `l` label/control pair (only for `tc` / `ct` data)
//! - `e` echo time
//! - `t` inversion time
//! - `r` repeat
//!
//! So `"letr"` means: label/control pairs adjacent, then all echoes of a pair,
//! then TIs, with repeats outermost.

use clap::ValueEnum;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::image::Image;
use crate::error::AppError;

/// How label and control images are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LabelFormat {
    /// Label first, then control.
    Tc,
    /// Control first, then label.
    Ct,
    /// Already differenced.
    Diff,
}

impl LabelFormat {
    pub fn has_pairs(self) -> bool {
        !matches!(self, LabelFormat::Diff)
    }

    pub fn default_order(self) -> &'static str {
        if self.has_pairs() { "letr" } else { "etr" }
    }
}

#[derive(Debug, Clone)]
pub struct AslImage {
    pub image: Image,
    pub iaf: LabelFormat,
    pub order: String,
    /// Inversion times (s).
    pub tis: Vec<f64>,
    /// Echo times (s).
    pub tes: Vec<f64>,
    /// Label durations per TI (s).
    pub taus: Vec<f64>,
    /// Repeats per TI.
    pub rpts: Vec<usize>,
}

const LETTERS: [char; 4] = ['l', 'e', 't', 'r'];

fn slot(letter: char) -> usize {
    match letter {
        'l' => 0,
        'e' => 1,
        't' => 2,
        _ => 3,
    }
}

/// Strided volume layout for one order string.
struct Layout {
    dims: Vec<(char, usize)>,
}

impl Layout {
    fn coords(&self, mut vol: usize) -> [usize; 4] {
        let mut out = [0usize; 4];
        for &(letter, size) in &self.dims {
            out[slot(letter)] = vol % size;
            vol /= size;
        }
        out
    }

    fn index(&self, coords: &[usize; 4]) -> usize {
        let mut idx = 0;
        let mut stride = 1;
        for &(letter, size) in &self.dims {
            idx += coords[slot(letter)] * stride;
            stride *= size;
        }
        idx
    }

    fn nvols(&self) -> usize {
        self.dims.iter().map(|(_, size)| size).product()
    }
}

impl AslImage {
    /// Build a dataset, expanding single-valued `taus` / `rpts` to one entry per TI.
    pub fn new(
        image: Image,
        iaf: LabelFormat,
        order: &str,
        tis: Vec<f64>,
        tes: Vec<f64>,
        mut taus: Vec<f64>,
        mut rpts: Vec<usize>,
    ) -> Result<Self, AppError> {
        if tis.is_empty() {
            return Err(AppError::config("At least one TI is required"));
        }
        if tes.is_empty() {
            return Err(AppError::config("At least one TE is required"));
        }
        let ntis = tis.len();
        if taus.len() == 1 && ntis > 1 {
            taus = vec![taus[0]; ntis];
        }
        if taus.len() != ntis {
            return Err(AppError::config(format!(
                "Number of label durations ({}) does not match number of TIs ({ntis})",
                taus.len()
            )));
        }
        if rpts.is_empty() {
            rpts = vec![1];
        }
        if rpts.len() == 1 && ntis > 1 {
            rpts = vec![rpts[0]; ntis];
        }
        if rpts.len() != ntis {
            return Err(AppError::config(format!(
                "Number of repeat counts ({}) does not match number of TIs ({ntis})",
                rpts.len()
            )));
        }
        if rpts.contains(&0) {
            return Err(AppError::config("Repeat counts must be positive"));
        }

        let asl = Self {
            image,
            iaf,
            order: order.to_string(),
            tis,
            tes,
            taus,
            rpts,
        };
        asl.validate_order(order)?;

        let expected = asl.expected_nvols();
        if asl.image.nvols != expected {
            return Err(AppError::data(format!(
                "ASL data has {} volumes, expected {expected} ({} TIs x {} TEs, repeats {:?}, {})",
                asl.image.nvols,
                asl.tis.len(),
                asl.tes.len(),
                asl.rpts,
                if iaf.has_pairs() { "label/control pairs" } else { "differenced" },
            )));
        }
        Ok(asl)
    }

    pub fn ntis(&self) -> usize {
        self.tis.len()
    }

    pub fn ntes(&self) -> usize {
        self.tes.len()
    }

    pub fn is_var_repeats(&self) -> bool {
        self.rpts.windows(2).any(|w| w[0] != w[1])
    }

    fn expected_nvols(&self) -> usize {
        let pairs = if self.iaf.has_pairs() { 2 } else { 1 };
        self.ntes() * self.rpts.iter().sum::<usize>() * pairs
    }

    fn dim_size(&self, letter: char) -> usize {
        match letter {
            'l' => {
                if self.iaf.has_pairs() {
                    2
                } else {
                    1
                }
            }
            'e' => self.ntes(),
            't' => self.ntis(),
            _ => self.rpts[0],
        }
    }

    fn validate_order(&self, order: &str) -> Result<(), AppError> {
        let mut seen = Vec::new();
        for letter in order.chars() {
            if !LETTERS.contains(&letter) {
                return Err(AppError::config(format!(
                    "Invalid character '{letter}' in data order '{order}' (expected l, e, t, r)"
                )));
            }
            if seen.contains(&letter) {
                return Err(AppError::config(format!(
                    "Repeated character '{letter}' in data order '{order}'"
                )));
            }
            seen.push(letter);
        }
        if self.iaf.has_pairs() != order.contains('l') {
            return Err(AppError::config(format!(
                "Data order '{order}' must contain 'l' exactly when data is label/control pairs"
            )));
        }
        if self.is_var_repeats() {
            return Ok(());
        }
        for letter in LETTERS {
            if !order.contains(letter) && self.dim_size(letter) > 1 {
                return Err(AppError::config(format!(
                    "Data order '{order}' is missing '{letter}'"
                )));
            }
        }
        Ok(())
    }

    fn layout(&self, order: &str) -> Layout {
        Layout {
            dims: order
                .chars()
                .map(|c| (c, self.dim_size(c)))
                .filter(|(_, size)| *size > 1)
                .collect(),
        }
    }

    fn require_fixed_repeats(&self, what: &str) -> Result<(), AppError> {
        if self.is_var_repeats() {
            return Err(AppError::data(format!(
                "Cannot {what} ASL data with variable repeats {:?}",
                self.rpts
            )));
        }
        Ok(())
    }

    /// Subtract label/control pairs (control minus label).
    ///
    /// Returns differenced data with the `l` dimension removed. Already
    /// differenced data is returned unchanged.
    pub fn diff(&self) -> Result<Self, AppError> {
        if !self.iaf.has_pairs() {
            return Ok(self.clone());
        }
        self.require_fixed_repeats("difference")?;

        let in_layout = self.layout(&self.order);
        let out_order: String = self.order.chars().filter(|&c| c != 'l').collect();
        let out_layout = self.layout(&out_order);
        let (label_idx, control_idx) = match self.iaf {
            LabelFormat::Ct => (1, 0),
            _ => (0, 1),
        };

        let nvox = self.image.nvox();
        let mut data = vec![0.0f32; nvox * out_layout.nvols()];
        data.par_chunks_mut(nvox).enumerate().for_each(|(out_vol, chunk)| {
            let mut coords = out_layout.coords(out_vol);
            coords[slot('l')] = label_idx;
            let label = self.image.volume(in_layout.index(&coords));
            coords[slot('l')] = control_idx;
            let control = self.image.volume(in_layout.index(&coords));
            for ((out, c), l) in chunk.iter_mut().zip(control).zip(label) {
                *out = c - l;
            }
        });

        Ok(Self {
            image: self.image.with_volumes(out_layout.nvols(), data)?,
            iaf: LabelFormat::Diff,
            order: out_order,
            tis: self.tis.clone(),
            tes: self.tes.clone(),
            taus: self.taus.clone(),
            rpts: self.rpts.clone(),
        })
    }

    /// Permute volumes so dimensions vary in `out_order` (fastest first).
    ///
    /// For label/control data an `out_order` without `l` keeps pairs adjacent;
    /// for differenced data an `l` in `out_order` is ignored.
    pub fn reorder(&self, out_order: &str) -> Result<Self, AppError> {
        self.require_fixed_repeats("reorder")?;

        let mut out_order: String = if self.iaf.has_pairs() {
            out_order.to_string()
        } else {
            out_order.chars().filter(|&c| c != 'l').collect()
        };
        if self.iaf.has_pairs() && !out_order.contains('l') {
            out_order.insert(0, 'l');
        }
        self.validate_order(&out_order)?;
        for letter in self.order.chars() {
            if !out_order.contains(letter) && self.dim_size(letter) > 1 {
                return Err(AppError::data(format!(
                    "Cannot reorder '{}' to '{out_order}': dimension '{letter}' would be dropped",
                    self.order
                )));
            }
        }

        let in_layout = self.layout(&self.order);
        let out_layout = self.layout(&out_order);
        let nvox = self.image.nvox();
        let mut data = vec![0.0f32; self.image.data.len()];
        data.par_chunks_mut(nvox).enumerate().for_each(|(out_vol, chunk)| {
            let src = in_layout.index(&out_layout.coords(out_vol));
            chunk.copy_from_slice(self.image.volume(src));
        });

        Ok(Self {
            image: self.image.with_volumes(self.image.nvols, data)?,
            order: out_order,
            ..self.clone()
        })
    }

    /// Average over echo times, giving single-TE differenced data ordered `rt`
    /// (repeats grouped inside each TI block, as resting-state fits read them).
    pub fn mean_across_echoes(&self) -> Result<Self, AppError> {
        if self.iaf.has_pairs() {
            return Err(AppError::data(
                "Echo averaging requires differenced data",
            ));
        }
        self.require_fixed_repeats("average echoes of")?;

        let in_layout = self.layout(&self.order);
        let out = Layout {
            dims: [('r', self.rpts[0]), ('t', self.ntis())]
                .into_iter()
                .filter(|(_, size)| *size > 1)
                .collect(),
        };
        let ntes = self.ntes();
        let nvox = self.image.nvox();
        let mut data = vec![0.0f32; nvox * out.nvols()];
        data.par_chunks_mut(nvox).enumerate().for_each(|(out_vol, chunk)| {
            let mut coords = out.coords(out_vol);
            for te in 0..ntes {
                coords[slot('e')] = te;
                let vol = self.image.volume(in_layout.index(&coords));
                for (acc, v) in chunk.iter_mut().zip(vol) {
                    *acc += v;
                }
            }
            for acc in chunk.iter_mut() {
                *acc /= ntes as f32;
            }
        });

        let mean_te = self.tes.iter().sum::<f64>() / ntes as f64;
        Ok(Self {
            image: self.image.with_volumes(out.nvols(), data)?,
            iaf: LabelFormat::Diff,
            order: "rt".to_string(),
            tis: self.tis.clone(),
            tes: vec![mean_te],
            taus: self.taus.clone(),
            rpts: self.rpts.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One voxel per volume whose value encodes (l, e, t, r) as `1000l + 100e + 10t + r`.
    fn tagged(iaf: LabelFormat, order: &str, ntis: usize, ntes: usize, nrpts: usize) -> AslImage {
        let sizes = |c: char| match c {
            'l' => 2,
            'e' => ntes,
            't' => ntis,
            _ => nrpts,
        };
        let layout = Layout {
            dims: order.chars().map(|c| (c, sizes(c))).collect(),
        };
        let n = layout.nvols();
        let data: Vec<f32> = (0..n)
            .map(|v| {
                let c = layout.coords(v);
                (1000 * c[0] + 100 * c[1] + 10 * c[2] + c[3]) as f32
            })
            .collect();
        let image = Image::new([1, 1, 1], n, data).unwrap();
        AslImage::new(
            image,
            iaf,
            order,
            (0..ntis).map(|i| 1.0 + i as f64 * 0.5).collect(),
            (0..ntes).map(|i| 0.01 + i as f64 * 0.02).collect(),
            vec![1.4],
            vec![nrpts],
        )
        .unwrap()
    }

    #[test]
    fn new_expands_scalar_taus_and_rpts() {
        let asl = tagged(LabelFormat::Tc, "letr", 3, 2, 2);
        assert_eq!(asl.taus, vec![1.4, 1.4, 1.4]);
        assert_eq!(asl.rpts, vec![2, 2, 2]);
        assert!(!asl.is_var_repeats());
    }

    #[test]
    fn new_rejects_wrong_volume_count() {
        let image = Image::new([1, 1, 1], 5, vec![0.0; 5]).unwrap();
        let err = AslImage::new(image, LabelFormat::Diff, "etr", vec![1.0], vec![0.01, 0.02], vec![1.4], vec![2])
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn new_rejects_order_without_pairs_letter() {
        let image = Image::new([1, 1, 1], 8, vec![0.0; 8]).unwrap();
        let err = AslImage::new(image, LabelFormat::Tc, "etr", vec![1.0], vec![0.01, 0.02], vec![1.4], vec![2])
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn variable_repeats_detected() {
        let image = Image::new([1, 1, 1], 10, vec![0.0; 10]).unwrap();
        let asl = AslImage::new(
            image,
            LabelFormat::Diff,
            "etr",
            vec![1.0, 2.0],
            vec![0.01, 0.02],
            vec![1.4],
            vec![2, 3],
        )
        .unwrap();
        assert!(asl.is_var_repeats());
        assert!(asl.reorder("etr").is_err());
        assert!(asl.diff().is_ok());
    }

    #[test]
    fn diff_subtracts_label_from_control() {
        let asl = tagged(LabelFormat::Tc, "letr", 2, 2, 2);
        let diff = asl.diff().unwrap();
        assert_eq!(diff.iaf, LabelFormat::Diff);
        assert_eq!(diff.order, "etr");
        assert_eq!(diff.image.nvols, asl.image.nvols / 2);
        // control (l=1) minus label (l=0) is always 1000 with this tagging.
        assert!(diff.image.data.iter().all(|&v| v == 1000.0));
    }

    #[test]
    fn diff_respects_control_first() {
        let asl = tagged(LabelFormat::Ct, "letr", 1, 1, 2);
        let diff = asl.diff().unwrap();
        assert!(diff.image.data.iter().all(|&v| v == -1000.0));
    }

    #[test]
    fn reorder_to_etr_groups_echoes_within_ti() {
        let asl = tagged(LabelFormat::Diff, "rte", 2, 3, 2);
        let out = asl.reorder("etr").unwrap();
        assert_eq!(out.order, "etr");
        let expected: Vec<f32> = (0..2)
            .flat_map(|r| (0..2).flat_map(move |t| (0..3).map(move |e| (100 * e + 10 * t + r) as f32)))
            .collect();
        assert_eq!(out.image.data, expected);
    }

    #[test]
    fn reorder_keeps_pairs_adjacent_when_l_omitted() {
        let asl = tagged(LabelFormat::Tc, "tler", 2, 2, 1);
        let out = asl.reorder("etr").unwrap();
        assert_eq!(out.order, "letr");
        assert_eq!(&out.image.data[..4], &[0.0, 1000.0, 100.0, 1100.0]);
    }

    #[test]
    fn mean_across_echoes_averages() {
        let asl = tagged(LabelFormat::Diff, "etr", 2, 2, 1);
        let mean = asl.mean_across_echoes().unwrap();
        assert_eq!(mean.ntes(), 1);
        assert_eq!(mean.image.nvols, 2);
        // (0 + 100) / 2 and (10 + 110) / 2
        assert_eq!(mean.image.data, vec![50.0, 60.0]);
    }

    #[test]
    fn mean_across_echoes_groups_repeats_within_each_ti() {
        let asl = tagged(LabelFormat::Diff, "etr", 2, 2, 2);
        let mean = asl.mean_across_echoes().unwrap();
        assert_eq!(mean.order, "rt");
        // t0r0, t0r1, t1r0, t1r1 (each averaged over e=0 and e=1)
        assert_eq!(mean.image.data, vec![50.0, 51.0, 60.0, 61.0]);
    }
}
