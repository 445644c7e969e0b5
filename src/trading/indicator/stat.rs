//! 小型统计工具：线性回归端点值、滚动相关系数

/// 对 source 尾部 length 个点做最小二乘，返回回归线在倒数第 offset 根处的取值
/// （Pine `linreg(src, length, offset)` 语义，offset=0 即末端）。
///
/// 均值中心化写法：slope = Σ(x-x̄)(y-ȳ) / Σ(x-x̄)²，过点 (x̄, ȳ)。
pub fn calculate_linreg(source: &[f64], length: usize, offset: usize) -> Option<f64> {
    if length == 0 || source.len() < length {
        return None;
    }
    let window = &source[source.len() - length..];
    let n = length as f64;

    let x_mean = (n - 1.0) / 2.0;
    let y_mean = window.iter().sum::<f64>() / n;

    let mut cov_xy = 0.0;
    let mut var_x = 0.0;
    for (i, y) in window.iter().enumerate() {
        let dx = i as f64 - x_mean;
        cov_xy += dx * (y - y_mean);
        var_x += dx * dx;
    }
    // length == 1 时斜率无定义
    if var_x < f64::EPSILON {
        return None;
    }
    let slope = cov_xy / var_x;

    let x_eval = (length - 1).saturating_sub(offset) as f64;
    Some(y_mean + slope * (x_eval - x_mean))
}

/// 两个序列尾部 window 个点的皮尔逊相关系数。样本不足或方差为零返回 None。
pub fn rolling_correlation(xs: &[f64], ys: &[f64], window: usize) -> Option<f64> {
    if window < 2 || xs.len() < window || ys.len() < window {
        return None;
    }
    let xs = &xs[xs.len() - window..];
    let ys = &ys[ys.len() - window..];

    let n = window as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..window {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x < f64::EPSILON || var_y < f64::EPSILON {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linreg_on_straight_line() {
        let source: Vec<f64> = (0..20).map(|i| 2.0 * i as f64 + 1.0).collect();
        let v = calculate_linreg(&source, 10, 0).unwrap();
        // 直线上回归端点 = 最后一个点
        assert!((v - source.last().unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_linreg_offset_steps_back() {
        let source: Vec<f64> = (0..20).map(|i| 2.0 * i as f64 + 1.0).collect();
        let v = calculate_linreg(&source, 10, 1).unwrap();
        // 直线上 offset=1 即倒数第二个点
        assert!((v - source[source.len() - 2]).abs() < 1e-9);
    }

    #[test]
    fn test_linreg_insufficient_data() {
        assert!(calculate_linreg(&[1.0, 2.0], 10, 0).is_none());
        // 单点窗口斜率无定义
        assert!(calculate_linreg(&[1.0, 2.0], 1, 0).is_none());
    }

    #[test]
    fn test_correlation_perfect() {
        let xs: Vec<f64> = (0..96).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * x + 5.0).collect();
        let corr = rolling_correlation(&xs, &ys, 96).unwrap();
        assert!((corr - 1.0).abs() < 1e-9);
        let neg: Vec<f64> = xs.iter().map(|x| -x).collect();
        let corr = rolling_correlation(&xs, &neg, 96).unwrap();
        assert!((corr + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_correlation_degenerate() {
        let flat = vec![1.0; 96];
        let xs: Vec<f64> = (0..96).map(|i| i as f64).collect();
        assert!(rolling_correlation(&flat, &xs, 96).is_none());
    }
}
