use candle_ppl::candle_core::{Device, Tensor};
use candle_ppl::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn weather(ctx: &mut Context, _args: &()) -> Result<(f32, f32)> {
    let dev = Device::Cpu;
    let cloudy = ctx.sample("cloudy", Bernoulli::from_prob(0.3, &dev)?)?;
    let cloudy = cloudy.to_scalar::<f32>()?;

    let (mean, sd) = if cloudy > 0.5 { (55.0, 10.0) } else { (75.0, 15.0) };
    let temp = ctx.sample("temp", Normal::from_scalars(mean, sd, &dev)?)?;
    Ok((cloudy, temp.to_scalar::<f32>()?))
}

fn scalar(x: f32) -> Result<Tensor> {
    Ok(Tensor::new(x, &Device::Cpu)?)
}

#[test]
fn empty_condition_is_identity() -> Result<()> {
    let store = ParamStore::new();
    let (out_a, trace_a) = run(&weather, &(), &store, &mut StdRng::seed_from_u64(17))?;
    let conditioned = condition(weather, Observations::new());
    let (out_b, trace_b) = run(&conditioned, &(), &store, &mut StdRng::seed_from_u64(17))?;

    assert_eq!(out_a, out_b);
    assert_eq!(
        trace_a.names().collect::<Vec<_>>(),
        trace_b.names().collect::<Vec<_>>()
    );
    for site in trace_b.iter() {
        assert!(site.is_latent());
    }
    Ok(())
}

#[test]
fn conditioned_site_is_observed_and_pinned() -> Result<()> {
    let store = ParamStore::new();
    let model = condition(weather, Observations::new().with("cloudy", scalar(1.0)?));
    let mut rng = StdRng::seed_from_u64(0);

    for _ in 0..20 {
        let ((cloudy, _), trace) = run(&model, &(), &store, &mut rng)?;
        assert_eq!(cloudy, 1.0);
        assert!(trace.site("cloudy")?.is_observed());
        assert!(trace.site("temp")?.is_latent());
    }
    Ok(())
}

#[test]
fn outermost_condition_wins() -> Result<()> {
    fn one_site(ctx: &mut Context, _args: &()) -> Result<Tensor> {
        ctx.sample("a", Normal::from_scalars(0.0, 1.0, &Device::Cpu)?)
    }

    let store = ParamStore::new();
    let mut rng = StdRng::seed_from_u64(0);

    let inner = condition(one_site, Observations::new().with("a", scalar(1.0)?));
    let outer = condition(inner, Observations::new().with("a", scalar(2.0)?));
    let (a, _) = run(&outer, &(), &store, &mut rng)?;
    assert_eq!(a.to_scalar::<f32>()?, 2.0);

    // chaining on an existing conditioned model merges the layers
    let chained = condition(one_site, Observations::new().with("a", scalar(1.0)?))
        .condition(Observations::new().with("a", scalar(3.0)?));
    let (a, _) = run(&chained, &(), &store, &mut rng)?;
    assert_eq!(a.to_scalar::<f32>()?, 3.0);
    Ok(())
}

#[test]
fn condition_overrides_explicit_observation() -> Result<()> {
    fn observed(ctx: &mut Context, _args: &()) -> Result<Tensor> {
        let dist = Normal::from_scalars(0.0, 1.0, &Device::Cpu)?;
        ctx.observe("m", dist, &Tensor::new(5f32, &Device::Cpu)?)
    }

    let store = ParamStore::new();
    let mut rng = StdRng::seed_from_u64(0);
    let model = condition(observed, Observations::new().with("m", scalar(-1.0)?));
    let (m, trace) = run(&model, &(), &store, &mut rng)?;
    assert_eq!(m.to_scalar::<f32>()?, -1.0);
    assert!(trace.site("m")?.is_observed());
    Ok(())
}

#[test]
fn conditioning_on_unvisited_site_is_harmless() -> Result<()> {
    let store = ParamStore::new();
    let model = condition(weather, Observations::new().with("humidity", scalar(0.8)?));
    let (_, trace) = run(&model, &(), &store, &mut StdRng::seed_from_u64(3))?;
    assert_eq!(trace.len(), 2);
    assert!(!trace.contains("humidity"));
    Ok(())
}
