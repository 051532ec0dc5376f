//! 统计工具：描述统计、最小二乘拟合与假设检验。

use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// 样本方差（n - 1）
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

pub fn z_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev > 0.0 {
        (value - mean) / std_dev
    } else {
        0.0
    }
}

/// 每个值相对整体均值/标准差的 z 分数，标准差为 0 时全部为 0
pub fn z_scores(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let s = std_dev(values);
    values.iter().map(|v| z_score(*v, m, s)).collect()
}

/// 线性插值分位数，q ∈ [0, 1]
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// 最小二乘拟合结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// 残差标准误
    pub residual_std_error: f64,
    /// 斜率的双侧 p 值
    pub slope_p_value: f64,
    pub n: usize,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// 普通最小二乘 y = a + b·x
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Result<LinearFit> {
    if xs.len() != ys.len() {
        return Err(AnalyticsError::InvalidInput(format!(
            "length mismatch: {} x values, {} y values",
            xs.len(),
            ys.len()
        )));
    }
    let n = xs.len();
    if n < 3 {
        return Err(AnalyticsError::insufficient(3, n));
    }

    let x_mean = mean(xs);
    let y_mean = mean(ys);
    let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    if sxx <= 0.0 {
        return Err(AnalyticsError::InvalidInput(
            "x values have zero variance".to_string(),
        ));
    }
    let sxy: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();

    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let ss_res: f64 = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let ss_tot: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();

    let r_squared = if ss_tot > 0.0 {
        (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let df = (n - 2) as f64;
    let residual_std_error = (ss_res / df).sqrt();
    let slope_se = residual_std_error / sxx.sqrt();

    let slope_p_value = if slope_se > 0.0 {
        let t = slope / slope_se;
        (2.0 * student_t_sf(t.abs(), df)).min(1.0)
    } else if slope != 0.0 {
        0.0
    } else {
        1.0
    };

    Ok(LinearFit {
        slope,
        intercept,
        r_squared,
        residual_std_error,
        slope_p_value,
        n,
    })
}

/// 以索引为自变量的线性拟合
pub fn linear_regression_indexed(ys: &[f64]) -> Result<LinearFit> {
    let xs: Vec<f64> = (0..ys.len()).map(|i| i as f64).collect();
    linear_regression(&xs, ys)
}

/// Welch t 检验结果（单侧：current > baseline）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTestResult {
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
}

/// Welch 不等方差 t 检验，单侧备择假设 current 均值大于 baseline
pub fn welch_t_test(baseline: &[f64], current: &[f64]) -> Result<TTestResult> {
    let (nb, nc) = (baseline.len(), current.len());
    if nb < 2 || nc < 2 {
        return Err(AnalyticsError::insufficient(2, nb.min(nc)));
    }

    let vb = variance(baseline) / nb as f64;
    let vc = variance(current) / nc as f64;
    let diff = mean(current) - mean(baseline);
    let se = (vb + vc).sqrt();

    if se == 0.0 {
        let p_value = if diff > 0.0 {
            0.0
        } else if diff < 0.0 {
            1.0
        } else {
            0.5
        };
        let t = if diff == 0.0 { 0.0 } else { diff.signum() * f64::INFINITY };
        return Ok(TTestResult {
            t,
            df: (nb + nc - 2) as f64,
            p_value,
        });
    }

    let t = diff / se;
    let df = (vb + vc).powi(2)
        / (vb.powi(2) / (nb - 1) as f64 + vc.powi(2) / (nc - 1) as f64);

    Ok(TTestResult {
        t,
        df,
        p_value: student_t_sf(t, df),
    })
}

/// Mann-Whitney U 检验结果（单侧：current > baseline）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MannWhitneyResult {
    pub u: f64,
    pub z: f64,
    pub p_value: f64,
}

/// Mann-Whitney U 检验，正态近似，含连续性校正与并列秩校正
pub fn mann_whitney_u(baseline: &[f64], current: &[f64]) -> Result<MannWhitneyResult> {
    let (nb, nc) = (baseline.len(), current.len());
    if nb == 0 || nc == 0 {
        return Err(AnalyticsError::insufficient(1, nb.min(nc)));
    }

    // (值, 是否属于 current)
    let mut combined: Vec<(f64, bool)> = baseline
        .iter()
        .map(|v| (*v, false))
        .chain(current.iter().map(|v| (*v, true)))
        .collect();
    combined.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total = combined.len();
    let mut rank_sum_current = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < total {
        let mut j = i;
        while j + 1 < total && combined[j + 1].0 == combined[i].0 {
            j += 1;
        }
        // 秩从 1 开始，并列取平均秩
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let ties = (j - i + 1) as f64;
        tie_term += ties.powi(3) - ties;
        for item in &combined[i..=j] {
            if item.1 {
                rank_sum_current += avg_rank;
            }
        }
        i = j + 1;
    }

    let (nb_f, nc_f, n_f) = (nb as f64, nc as f64, total as f64);
    let u = rank_sum_current - nc_f * (nc_f + 1.0) / 2.0;
    let mu = nb_f * nc_f / 2.0;
    let sigma = if total > 1 {
        (nb_f * nc_f / 12.0 * ((n_f + 1.0) - tie_term / (n_f * (n_f - 1.0)))).sqrt()
    } else {
        0.0
    };

    if sigma.is_nan() || sigma <= 0.0 {
        return Ok(MannWhitneyResult {
            u,
            z: 0.0,
            p_value: 1.0,
        });
    }

    let z = (u - mu - 0.5) / sigma;
    Ok(MannWhitneyResult {
        u,
        z,
        p_value: 1.0 - normal_cdf(z),
    })
}

/// Cohen's d，使用合并标准差
pub fn cohens_d(baseline: &[f64], current: &[f64]) -> f64 {
    let (nb, nc) = (baseline.len(), current.len());
    if nb < 2 || nc < 2 {
        return 0.0;
    }
    let pooled = (((nb - 1) as f64 * variance(baseline) + (nc - 1) as f64 * variance(current))
        / (nb + nc - 2) as f64)
        .sqrt();
    if pooled > 0.0 {
        (mean(current) - mean(baseline)) / pooled
    } else {
        0.0
    }
}

/// 标准正态分布函数
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26，绝对误差 < 1.5e-7
pub fn erf(x: f64) -> f64 {
    const P: f64 = 0.3275911;
    const A: [f64; 5] = [
        0.254829592,
        -0.284496736,
        1.421413741,
        -1.453152027,
        1.061405429,
    ];

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = A.iter().rev().fold(0.0, |acc, a| acc * t + a) * t;
    sign * (1.0 - poly * (-x * x).exp())
}

/// Student t 分布上尾概率 P(T > t)
pub fn student_t_sf(t: f64, df: f64) -> f64 {
    if t.is_infinite() {
        return if t > 0.0 { 0.0 } else { 1.0 };
    }
    if df.is_nan() || df <= 0.0 || t.is_nan() {
        return 1.0;
    }
    let x = df / (df + t * t);
    let tail = 0.5 * regularized_incomplete_beta(df / 2.0, 0.5, x);
    if t >= 0.0 {
        tail
    } else {
        1.0 - tail
    }
}

/// Lanczos 近似 (g = 7)
pub fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + 7.5;
    let series = COEFFS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFS[0], |acc, (i, c)| acc + c / (x + i as f64));

    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// 正则化不完全 Beta 函数 I_x(a, b)
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 300;
    const EPS: f64 = 3.0e-14;
    const FPMIN: f64 = 1.0e-300;

    let guard = |v: f64| if v.abs() < FPMIN { FPMIN } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + aa * d);
        c = guard(1.0 + aa / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    h
}
