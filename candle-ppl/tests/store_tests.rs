use approx::assert_abs_diff_eq;
use candle_ppl::candle_core::{DType, Device, Tensor};
use candle_ppl::candle_nn::SGD;
use candle_ppl::*;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn model(ctx: &mut Context, obs: &Tensor) -> Result<()> {
    let dev = obs.device();
    let p = ctx.sample("p", Normal::from_scalars(0.0, 2.0, dev)?)?;
    ctx.observe("x", Normal::new(&p, &Tensor::new(1f32, dev)?)?, obs)?;
    Ok(())
}

fn guide(ctx: &mut Context, obs: &Tensor) -> Result<()> {
    let dev = obs.device();
    let loc = ctx.param("p_loc", &Tensor::new(0f32, dev)?, Constraint::Real)?;
    let scale = ctx.param("p_scale", &Tensor::new(0.5f32, dev)?, Constraint::Positive)?;
    let w = ctx.param_with(
        "weights",
        || Tensor::full(0.25f32, 4, dev),
        Constraint::UnitInterval,
    )?;
    let shift = w.sum_all()?; // unit interval parameter enters the guide
    let loc = (loc + (shift - 1.0)?)?;
    ctx.sample("p", Normal::new(&loc, &scale)?)?;
    Ok(())
}

#[test]
fn save_and_load_round_trip() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("params.safetensors");

    let store = ParamStore::new();
    let obs = Tensor::new(1.5f32, &Device::Cpu)?;
    let mut svi: Svi<_, _, SGD> =
        Svi::new(model, guide, 0.05, Elbo::default(), store.clone()).with_seed(8);
    svi.run(&obs, 30)?;
    store.save(&path)?;
    assert!(path.exists());

    let restored = ParamStore::new();
    restored.load(&path, &Device::Cpu)?;

    assert_eq!(restored.names()?, store.names()?);
    for name in store.names()? {
        assert_eq!(restored.constraint(&name)?, store.constraint(&name)?);
        let a = store.get(&name)?.flatten_all()?.to_vec1::<f32>()?;
        let b = restored.get(&name)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-6);
        }
    }
    Ok(())
}

#[test]
fn load_replaces_existing_parameters() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("one.safetensors");
    let dev = Device::Cpu;

    let saved = ParamStore::new();
    saved.param("a", &Tensor::new(0.7f32, &dev)?, Constraint::UnitInterval)?;
    saved.save(&path)?;

    let store = ParamStore::new();
    store.param("b", &Tensor::new(3f32, &dev)?, Constraint::Real)?;
    store.load(&path, &dev)?;

    assert_eq!(store.names()?, vec!["a"]);
    assert!(!store.contains("b")?);
    assert_abs_diff_eq!(store.get("a")?.to_scalar::<f32>()?, 0.7, epsilon = 1e-6);
    assert_eq!(store.constraint("a")?, Constraint::UnitInterval);
    Ok(())
}

#[test]
fn loaded_parameters_are_trainable() -> Result<()> {
    init_logger();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("trained.safetensors");
    let obs = Tensor::new(1.5f32, &Device::Cpu)?;

    let store = ParamStore::new();
    let mut svi: Svi<_, _, SGD> =
        Svi::new(model, guide, 0.05, Elbo::default(), store.clone()).with_seed(1);
    svi.run(&obs, 5)?;
    store.save(&path)?;

    let resumed = ParamStore::new();
    resumed.load(&path, &Device::Cpu)?;
    let before = resumed.get("p_loc")?.to_scalar::<f32>()?;

    let mut svi: Svi<_, _, SGD> =
        Svi::new(model, guide, 0.05, Elbo::default(), resumed.clone()).with_seed(2);
    svi.step(&obs)?;
    assert_ne!(resumed.get("p_loc")?.to_scalar::<f32>()?, before);
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = ParamStore::new();
    let res = store.load(dir.path().join("nothing.safetensors"), &Device::Cpu);
    assert!(res.is_err());
    assert!(store.is_empty()?);
    Ok(())
}

#[test]
fn param_with_only_builds_once() -> Result<()> {
    let store = ParamStore::new();
    let dev = Device::Cpu;
    let mut calls = 0;
    for _ in 0..3 {
        store.param_with(
            "z",
            || {
                calls += 1;
                Tensor::zeros((2, 3), DType::F32, &dev)
            },
            Constraint::Real,
        )?;
    }
    assert_eq!(calls, 1);
    assert_eq!(store.get("z")?.dims(), &[2, 3]);
    Ok(())
}
