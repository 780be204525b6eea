//! CPU reference implementations of the formulas the reduction kernels
//! evaluate on the GPU. The kernels in `src/shaders/` must agree with these
//! functions; the numeric tests are written against them.

use glam::Vec3;

/// Parameters of the CIE standard clear sky relative luminance model.
pub const CIE_A: f32 = -1.0;
pub const CIE_B: f32 = -0.25;
pub const CIE_C: f32 = 16.0;
pub const CIE_D: f32 = -3.0;
pub const CIE_E: f32 = 0.3;

/// Per-pixel solid-angle weight for a cube-map sampling of the sphere.
///
/// `i`, `j` are the pixel coordinates on a face, `n`, `m` the face width and
/// height. Summing the weight over all pixels of all six faces approximates
/// the full sphere's solid angle of `4π`.
pub fn solid_angle_weight(i: u32, j: u32, n: u32, m: u32) -> f32 {
    let (i, j) = (i as f32, j as f32);
    let (n, m) = (n as f32, m as f32);
    let t = 3.0 + 4.0 * j * (j - m) / (m * m) + 4.0 * i * (i - n) / (n * n);
    4.0 / (n * m * t.powf(1.5))
}

/// Projects a direction onto (azimuth, altitude) in radians.
///
/// Azimuth is `atan2(y, x)`, altitude `asin(z)` of the normalized vector;
/// the zero direction convention matches the reduction kernels.
pub fn project_spherical(dir: Vec3) -> (f32, f32) {
    let nv = dir.normalize();
    let phi = if nv.x == 0.0 && nv.y == 0.0 {
        0.0
    } else {
        nv.y.atan2(nv.x)
    };
    let theta = nv.z.asin();
    (phi, theta)
}

/// Relative luminance of a sky element under the CIE clear sky model.
///
/// `azimuth`/`altitude` locate the sky element, `sun_azimuth`/`sun_altitude`
/// the sun, all in radians. The result is normalized so that the zenith has
/// relative luminance 1 and scaled by `zenith_luminance`.
pub fn cie_clear_sky(
    azimuth: f32,
    altitude: f32,
    sun_azimuth: f32,
    sun_altitude: f32,
    zenith_luminance: f32,
) -> f32 {
    use std::f32::consts::FRAC_PI_2;

    let z_s = FRAC_PI_2 - sun_altitude;
    let phi0 = 1.0 + CIE_A * CIE_B.exp();
    let fzs = 1.0 + CIE_C * ((CIE_D * z_s).exp() - (CIE_D * FRAC_PI_2).exp())
        + CIE_E * z_s.cos().powi(2);

    let z = FRAC_PI_2 - altitude;
    let chi = (z_s.cos() * z.cos() + z_s.sin() * z.sin() * (azimuth - sun_azimuth).abs().cos())
        .clamp(-1.0, 1.0)
        .acos();
    let fchi = 1.0 + CIE_C * ((CIE_D * chi).exp() - (CIE_D * FRAC_PI_2).exp())
        + CIE_E * chi.cos().powi(2);
    let phiz = 1.0 + CIE_A * (CIE_B / z).exp();

    fchi * phiz / (fzs * phi0) * zenith_luminance
}

/// Great-circle distance between two (azimuth, altitude) directions, used by
/// the groups kernel to gate pixels against the field of view.
pub fn angular_distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    (a.1.sin() * b.1.sin() + a.1.cos() * b.1.cos() * (a.0 - b.0).cos())
        .clamp(-1.0, 1.0)
        .acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn weight_sum_over_sphere_is_close_to_4pi() {
        let (n, m) = (64, 64);
        let mut sum = 0.0f64;
        for j in 0..m {
            for i in 0..n {
                sum += solid_angle_weight(i, j, n, m) as f64;
            }
        }
        sum *= 6.0;
        // The weight is an approximation; the six-face sum should land near
        // the full sphere's 4π within a few percent.
        let expected = 4.0 * PI as f64;
        assert!(
            (sum - expected).abs() / expected < 0.05,
            "six-face weight sum {sum} too far from 4π"
        );
    }

    #[test]
    fn weight_sum_is_permutation_invariant() {
        let (n, m) = (32, 32);
        let mut weights: Vec<f32> = (0..m)
            .flat_map(|j| (0..n).map(move |i| solid_angle_weight(i, j, n, m)))
            .collect();
        let forward: f64 = weights.iter().map(|&w| w as f64).sum();
        weights.reverse();
        let backward: f64 = weights.iter().map(|&w| w as f64).sum();
        assert_relative_eq!(forward, backward, max_relative = 1e-12);
    }

    #[test]
    fn projection_of_axes() {
        let (phi, theta) = project_spherical(Vec3::X);
        assert_relative_eq!(phi, 0.0);
        assert_relative_eq!(theta, 0.0);

        let (phi, theta) = project_spherical(Vec3::Y);
        assert_relative_eq!(phi, PI / 2.0);
        assert_relative_eq!(theta, 0.0);

        let (_, theta) = project_spherical(Vec3::Z);
        assert_relative_eq!(theta, PI / 2.0);
    }

    #[test]
    fn cie_scales_linearly_with_zenith_luminance() {
        let one = cie_clear_sky(0.3, 0.8, 1.0, 0.9, 1.0);
        let five = cie_clear_sky(0.3, 0.8, 1.0, 0.9, 5.0);
        assert_relative_eq!(five, 5.0 * one, max_relative = 1e-6);
    }

    #[test]
    fn cie_is_brighter_toward_the_sun() {
        let sun = (1.2f32, 0.9f32);
        let near = cie_clear_sky(sun.0, sun.1 - 0.05, sun.0, sun.1, 1000.0);
        let far = cie_clear_sky(sun.0 + PI, 0.2, sun.0, sun.1, 1000.0);
        assert!(near > far, "sky near the sun ({near}) must outshine the opposite sky ({far})");
    }

    #[test]
    fn angular_distance_of_identical_directions_is_zero() {
        let d = angular_distance((0.4, 0.2), (0.4, 0.2));
        assert!(d.abs() < 1e-3);
    }
}
