//! Disney principled BSDF for wgpu path tracers
//!
//! WGSL library plus a CPU port of the same math, so a shader and a
//! reference renderer can share one material model.
//!
//! ## References
//! - [Physically Based Shading at Disney](https://media.disneyanimation.com/uploads/production/publication_asset/48/asset/s2012_pbs_disney_brdf_notes_v3.pdf)
//! - [GLSL-PathTracer](https://github.com/knightcrawler25/GLSL-PathTracer)
//!
//! ## Usage
//!
//! ```ignore
//! use disney_bsdf::{library_source, BsdfParams, ShadingState, Pcg, disney_sample};
//!
//! // WGSL: prepend to your own kernels
//! let wgsl = format!("{}\n{}", library_source(), MY_KERNELS);
//!
//! // CPU: same sampling as the shader
//! let state = ShadingState::new(BsdfParams::diffuse(Vec3::splat(0.8)), normal, ray_dir);
//! let mut rng = Pcg::new(pixel, frame_seed, salt);
//! let s = disney_sample(&state, -ray_dir, state.ffnormal, &mut rng);
//! ```

mod eval;
mod params;
mod sampling;

pub use eval::{
    disney_eval, disney_sample, dielectric_fresnel, eval_clearcoat, eval_diffuse,
    eval_dielectric_reflection, eval_dielectric_refraction, eval_specular, gtr1, gtr2,
    gtr2_aniso, schlick_fresnel, smith_g_ggx, smith_g_ggx_aniso, BsdfEval, BsdfSample,
    ShadingState, ROUGHNESS_FLOOR,
};
pub use params::BsdfParams;
pub use sampling::{
    cone_solid_angle, cosine_sample_hemisphere, importance_sample_gtr1, importance_sample_gtr2,
    importance_sample_gtr2_aniso, pcg_hash, power_heuristic, uniform_sample_hemisphere,
    uniform_sample_sphere, Pcg,
};

/// BSDF functions (expects `rand()` from [`RNG_SOURCE`]).
pub const BSDF_SOURCE: &str = include_str!("shaders/disney.wgsl");

/// PCG random stream: `rng_seed(pixel, frame_seed, salt)` and `rand()`.
pub const RNG_SOURCE: &str = include_str!("shaders/rng.wgsl");

/// Complete WGSL library: random stream followed by the BSDF.
pub fn library_source() -> String {
    format!("{RNG_SOURCE}\n{BSDF_SOURCE}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_parses() {
        let module = naga::front::wgsl::parse_str(&library_source());
        assert!(module.is_ok(), "{:?}", module.err());
    }

    #[test]
    fn test_library_validates() {
        let module = naga::front::wgsl::parse_str(&library_source()).expect("parse");
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::empty(),
        );
        assert!(validator.validate(&module).is_ok());
    }

    #[test]
    fn test_entry_names_present() {
        for name in ["fn disney_sample", "fn disney_eval", "fn power_heuristic", "fn uniform_sample_sphere", "fn mix_materials"] {
            assert!(BSDF_SOURCE.contains(name), "missing {name}");
        }
    }
}
