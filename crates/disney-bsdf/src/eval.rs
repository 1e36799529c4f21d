//! CPU evaluation of the principled BSDF.
//!
//! Line-for-line counterpart of `shaders/disney.wgsl`. Directions follow the
//! usual convention: `v` points toward the viewer, `l` toward the light, and
//! `n` is the face-forward shading normal.

use glam::Vec3;
use std::f32::consts::FRAC_1_PI;

use crate::params::BsdfParams;
use crate::sampling::*;

pub const ROUGHNESS_FLOOR: f32 = 1e-4;

/// Shading frame and derived quantities at a surface hit.
#[derive(Clone, Copy, Debug)]
pub struct ShadingState {
    pub mat: BsdfParams,
    pub normal: Vec3,
    pub ffnormal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
    pub eta: f32,
    pub ax: f32,
    pub ay: f32,
}

impl ShadingState {
    pub fn new(mat: BsdfParams, normal: Vec3, ray_dir: Vec3) -> Self {
        let mut mat = mat;
        mat.roughness = mat.roughness.max(ROUGHNESS_FLOOR);

        let (ffnormal, eta) = if normal.dot(ray_dir) <= 0.0 {
            (normal, 1.0 / mat.ior)
        } else {
            (-normal, mat.ior)
        };

        let aspect = (1.0 - mat.anisotropic * 0.9).sqrt();
        let ax = (mat.roughness / aspect).max(0.001);
        let ay = (mat.roughness * aspect).max(0.001);

        let up = if ffnormal.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
        let tangent = up.cross(ffnormal).normalize();
        let bitangent = ffnormal.cross(tangent);

        Self { mat, normal, ffnormal, tangent, bitangent, eta, ax, ay }
    }

    #[inline]
    fn to_world(&self, v: Vec3) -> Vec3 {
        self.tangent * v.x + self.bitangent * v.y + self.ffnormal * v.z
    }
}

/// BSDF value and pdf for a fixed direction pair.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BsdfEval {
    pub f: Vec3,
    pub pdf: f32,
}

/// Sampled outgoing direction with its value and pdf.
///
/// `pdf <= 0` marks a degenerate sample; callers drop it.
#[derive(Clone, Copy, Debug)]
pub struct BsdfSample {
    pub l: Vec3,
    pub f: Vec3,
    pub pdf: f32,
}

pub fn schlick_fresnel(u: f32) -> f32 {
    let m = (1.0 - u).clamp(0.0, 1.0);
    let m2 = m * m;
    m2 * m2 * m
}

pub fn dielectric_fresnel(cos_theta_i: f32, eta: f32) -> f32 {
    let sin_theta_t_sq = eta * eta * (1.0 - cos_theta_i * cos_theta_i);
    // total internal reflection
    if sin_theta_t_sq > 1.0 {
        return 1.0;
    }
    let cos_theta_t = (1.0 - sin_theta_t_sq).max(0.0).sqrt();
    let rs = (eta * cos_theta_t - cos_theta_i) / (eta * cos_theta_t + cos_theta_i);
    let rp = (eta * cos_theta_i - cos_theta_t) / (eta * cos_theta_i + cos_theta_t);
    0.5 * (rs * rs + rp * rp)
}

pub fn gtr1(n_dot_h: f32, a: f32) -> f32 {
    if a >= 1.0 {
        return FRAC_1_PI;
    }
    let a2 = a * a;
    let t = 1.0 + (a2 - 1.0) * n_dot_h * n_dot_h;
    (a2 - 1.0) / (std::f32::consts::PI * a2.ln() * t)
}

pub fn gtr2(n_dot_h: f32, a: f32) -> f32 {
    let a2 = a * a;
    let t = 1.0 + (a2 - 1.0) * n_dot_h * n_dot_h;
    a2 / (std::f32::consts::PI * t * t)
}

pub fn gtr2_aniso(n_dot_h: f32, h_dot_x: f32, h_dot_y: f32, ax: f32, ay: f32) -> f32 {
    let a = h_dot_x / ax;
    let b = h_dot_y / ay;
    let c = a * a + b * b + n_dot_h * n_dot_h;
    1.0 / (std::f32::consts::PI * ax * ay * c * c)
}

pub fn smith_g_ggx(n_dot_v: f32, alpha_g: f32) -> f32 {
    let a = alpha_g * alpha_g;
    let b = n_dot_v * n_dot_v;
    1.0 / (n_dot_v + (a + b - a * b).sqrt())
}

pub fn smith_g_ggx_aniso(n_dot_v: f32, v_dot_x: f32, v_dot_y: f32, ax: f32, ay: f32) -> f32 {
    let a = v_dot_x * ax;
    let b = v_dot_y * ay;
    1.0 / (n_dot_v + (a * a + b * b + n_dot_v * n_dot_v).sqrt())
}

fn mixf(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Specular F0 and sheen tint.
fn lobe_tints(mat: &BsdfParams) -> (Vec3, Vec3) {
    let cdlin = mat.albedo;
    let cdlum = 0.3 * cdlin.x + 0.6 * cdlin.y + 0.1 * cdlin.z;
    let ctint = if cdlum > 0.0 { cdlin / cdlum } else { Vec3::ONE };
    let cspec0 = (mat.specular * 0.08 * Vec3::ONE.lerp(ctint, mat.specular_tint)).lerp(cdlin, mat.metallic);
    let csheen = Vec3::ONE.lerp(ctint, mat.sheen_tint);
    (cspec0, csheen)
}

fn reflect(i: Vec3, n: Vec3) -> Vec3 {
    i - 2.0 * n.dot(i) * n
}

/// Refraction with the WGSL `refract` semantics (zero vector on TIR).
fn refract(i: Vec3, n: Vec3, eta: f32) -> Vec3 {
    let n_dot_i = n.dot(i);
    let k = 1.0 - eta * eta * (1.0 - n_dot_i * n_dot_i);
    if k < 0.0 {
        Vec3::ZERO
    } else {
        eta * i - (eta * n_dot_i + k.sqrt()) * n
    }
}

pub fn eval_dielectric_reflection(s: &ShadingState, v: Vec3, n: Vec3, l: Vec3, h: Vec3) -> BsdfEval {
    if n.dot(l) <= 0.0 {
        return BsdfEval::default();
    }
    let fr = dielectric_fresnel(v.dot(h), s.eta);
    let d = gtr2(n.dot(h), s.mat.roughness);
    let pdf = d * n.dot(h) * fr / (4.0 * v.dot(h).abs());
    let g = smith_g_ggx(n.dot(l).abs(), s.mat.roughness) * smith_g_ggx(n.dot(v).abs(), s.mat.roughness);
    BsdfEval { f: s.mat.albedo * fr * d * g, pdf }
}

pub fn eval_dielectric_refraction(s: &ShadingState, v: Vec3, n: Vec3, l: Vec3, h: Vec3) -> BsdfEval {
    if n.dot(l) >= 0.0 {
        return BsdfEval::default();
    }
    let fr = dielectric_fresnel(v.dot(h).abs(), s.eta);
    let d = gtr2(n.dot(h), s.mat.roughness);
    let denom_sqrt = l.dot(h) + v.dot(h) * s.eta;
    let denom = denom_sqrt * denom_sqrt;
    let pdf = d * n.dot(h) * (1.0 - fr) * l.dot(h).abs() / denom;
    let g = smith_g_ggx(n.dot(l).abs(), s.mat.roughness) * smith_g_ggx(n.dot(v).abs(), s.mat.roughness);
    let f = s.mat.albedo * (1.0 - fr) * d * g * v.dot(h).abs() * l.dot(h).abs() * 4.0 * s.eta * s.eta / denom;
    BsdfEval { f, pdf }
}

pub fn eval_specular(s: &ShadingState, cspec0: Vec3, v: Vec3, n: Vec3, l: Vec3, h: Vec3) -> BsdfEval {
    let n_dot_l = n.dot(l);
    if n_dot_l <= 0.0 {
        return BsdfEval::default();
    }
    let n_dot_h = n.dot(h);
    let d = gtr2_aniso(n_dot_h, h.dot(s.tangent), h.dot(s.bitangent), s.ax, s.ay);
    let pdf = d * n_dot_h / (4.0 * v.dot(h));

    let fh = schlick_fresnel(l.dot(h));
    let fr = cspec0.lerp(Vec3::ONE, fh);
    let g = smith_g_ggx_aniso(n_dot_l, l.dot(s.tangent), l.dot(s.bitangent), s.ax, s.ay)
        * smith_g_ggx_aniso(n.dot(v).abs(), v.dot(s.tangent), v.dot(s.bitangent), s.ax, s.ay);
    BsdfEval { f: fr * d * g, pdf }
}

pub fn eval_clearcoat(s: &ShadingState, v: Vec3, n: Vec3, l: Vec3, h: Vec3) -> BsdfEval {
    if n.dot(l) <= 0.0 {
        return BsdfEval::default();
    }
    let d = gtr1(n.dot(h), mixf(0.1, 0.001, s.mat.clearcoat_gloss));
    let pdf = d * n.dot(h) / (4.0 * v.dot(h));
    let fh = schlick_fresnel(l.dot(h));
    let fr = mixf(0.04, 1.0, fh);
    let g = smith_g_ggx(n.dot(l), 0.25) * smith_g_ggx(n.dot(v), 0.25);
    BsdfEval { f: Vec3::splat(0.25 * s.mat.clearcoat * fr * d * g), pdf }
}

pub fn eval_diffuse(s: &ShadingState, csheen: Vec3, v: Vec3, n: Vec3, l: Vec3, h: Vec3) -> BsdfEval {
    let n_dot_l = n.dot(l);
    if n_dot_l <= 0.0 {
        return BsdfEval::default();
    }
    let pdf = n_dot_l * FRAC_1_PI;

    let n_dot_v = n.dot(v);
    let l_dot_h = l.dot(h);
    let fl = schlick_fresnel(n_dot_l);
    let fv = schlick_fresnel(n_dot_v);
    let fh = schlick_fresnel(l_dot_h);
    let fd90 = 0.5 + 2.0 * l_dot_h * l_dot_h * s.mat.roughness;
    let fd = mixf(1.0, fd90, fl) * mixf(1.0, fd90, fv);

    // fake subsurface
    let fss90 = l_dot_h * l_dot_h * s.mat.roughness;
    let fss = mixf(1.0, fss90, fl) * mixf(1.0, fss90, fv);
    let ss = 1.25 * (fss * (1.0 / (n_dot_l + n_dot_v) - 0.5) + 0.5);

    let fsheen = fh * s.mat.sheen * csheen;
    let f = (FRAC_1_PI * mixf(fd, ss, s.mat.subsurface) * s.mat.albedo + fsheen) * (1.0 - s.mat.metallic);
    BsdfEval { f, pdf }
}

/// Importance-sample one lobe and return the sampled direction.
pub fn disney_sample(s: &ShadingState, v: Vec3, n: Vec3, rng: &mut Pcg) -> BsdfSample {
    let r1 = rng.next_f32();
    let r2 = rng.next_f32();

    let diffuse_ratio = 0.5 * (1.0 - s.mat.metallic);
    let trans_weight = (1.0 - s.mat.metallic) * s.mat.transmission;
    let (cspec0, csheen) = lobe_tints(&s.mat);

    if rng.next_f32() < trans_weight {
        let mut h = s.to_world(importance_sample_gtr2(s.mat.roughness, r1, r2));
        if v.dot(h) < 0.0 {
            h = -h;
        }
        let r = reflect(-v, h);
        let fr = dielectric_fresnel(r.dot(h).abs(), s.eta);
        let (l, e) = if rng.next_f32() < fr {
            let l = r.normalize_or_zero();
            (l, eval_dielectric_reflection(s, v, n, l, h))
        } else {
            let l = refract(-v, h, s.eta).normalize_or_zero();
            (l, eval_dielectric_refraction(s, v, n, l, h))
        };
        return BsdfSample { l, f: e.f * trans_weight, pdf: e.pdf * trans_weight };
    }

    let (l, mut e) = if rng.next_f32() < diffuse_ratio {
        let l = s.to_world(cosine_sample_hemisphere(r1, r2));
        let h = (l + v).normalize_or_zero();
        let mut e = eval_diffuse(s, csheen, v, n, l, h);
        e.pdf *= diffuse_ratio;
        (l, e)
    } else {
        let primary_spec_ratio = 1.0 / (1.0 + s.mat.clearcoat);
        if rng.next_f32() < primary_spec_ratio {
            let mut h = s.to_world(importance_sample_gtr2_aniso(s.ax, s.ay, r1, r2));
            if v.dot(h) < 0.0 {
                h = -h;
            }
            let l = reflect(-v, h).normalize_or_zero();
            let mut e = eval_specular(s, cspec0, v, n, l, h);
            e.pdf *= primary_spec_ratio * (1.0 - diffuse_ratio);
            (l, e)
        } else {
            let mut h = s.to_world(importance_sample_gtr1(mixf(0.1, 0.001, s.mat.clearcoat_gloss), r1, r2));
            if v.dot(h) < 0.0 {
                h = -h;
            }
            let l = reflect(-v, h).normalize_or_zero();
            let mut e = eval_clearcoat(s, v, n, l, h);
            e.pdf *= (1.0 - primary_spec_ratio) * (1.0 - diffuse_ratio);
            (l, e)
        }
    };
    e.f *= 1.0 - trans_weight;
    e.pdf *= 1.0 - trans_weight;
    BsdfSample { l, f: e.f, pdf: e.pdf }
}

/// Evaluate the full BSDF and its combined sampling pdf for direction `l`.
pub fn disney_eval(s: &ShadingState, v: Vec3, n: Vec3, l: Vec3) -> BsdfEval {
    let refl = n.dot(l) > 0.0;
    let mut h = if refl { (l + v).normalize_or_zero() } else { (l + v * s.eta).normalize_or_zero() };
    if v.dot(h) < 0.0 {
        h = -h;
    }

    let diffuse_ratio = 0.5 * (1.0 - s.mat.metallic);
    let primary_spec_ratio = 1.0 / (1.0 + s.mat.clearcoat);
    let trans_weight = (1.0 - s.mat.metallic) * s.mat.transmission;

    let mut bsdf = BsdfEval::default();
    if trans_weight > 0.0 {
        bsdf = if refl {
            eval_dielectric_reflection(s, v, n, l, h)
        } else {
            eval_dielectric_refraction(s, v, n, l, h)
        };
    }

    let mut brdf = Vec3::ZERO;
    let mut brdf_pdf = 0.0;
    if trans_weight < 1.0 {
        let (cspec0, csheen) = lobe_tints(&s.mat);

        let d = eval_diffuse(s, csheen, v, n, l, h);
        brdf += d.f;
        brdf_pdf += d.pdf * diffuse_ratio;

        let sp = eval_specular(s, cspec0, v, n, l, h);
        brdf += sp.f;
        brdf_pdf += sp.pdf * primary_spec_ratio * (1.0 - diffuse_ratio);

        let cc = eval_clearcoat(s, v, n, l, h);
        brdf += cc.f;
        brdf_pdf += cc.pdf * (1.0 - primary_spec_ratio) * (1.0 - diffuse_ratio);
    }

    BsdfEval {
        f: brdf.lerp(bsdf.f, trans_weight),
        pdf: mixf(brdf_pdf, bsdf.pdf, trans_weight),
    }
}
