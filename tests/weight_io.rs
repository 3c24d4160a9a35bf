//! Weight sets survive the trip through both on-disk formats.

use lumen_rnn::layers::rnn::ConditionalGru;
use lumen_rnn::loader::{load_safetensors, missing_keys, save_safetensors};
use lumen_rnn::registry::build;
use lumen_rnn::{LayerConfig, LayerKind, WeightSet};
use ndarray::Array;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("lumen_rnn_{}_{}", std::process::id(), name))
}

fn decoder_and_encoder() -> (LayerConfig, WeightSet) {
    let mut rng = StdRng::seed_from_u64(17);
    let dec = LayerConfig::new(LayerKind::GruCond, 4, 3).with_prefix("decoder").with_layernorm(true);
    let enc = LayerConfig::new(LayerKind::Gru, 4, 3).with_prefix("encoder");

    let (_, mut ws) = build(&dec, &mut rng).unwrap();
    let (_, enc_ws) = build(&enc, &mut rng).unwrap();
    ws.extend(enc_ws);
    (dec, ws)
}

#[test]
fn safetensors_round_trip_keeps_every_tensor() {
    let (_, ws) = decoder_and_encoder();
    let path = temp_path("all.safetensors");
    save_safetensors(&ws, &path).unwrap();
    let loaded = load_safetensors(&path, None).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, ws);
}

#[test]
fn prefix_filter_loads_one_layer() {
    let (dec, ws) = decoder_and_encoder();
    let path = temp_path("filtered.safetensors");
    save_safetensors(&ws, &path).unwrap();
    let decoder_only = load_safetensors(&path, Some("decoder_")).unwrap();
    std::fs::remove_file(&path).ok();

    assert!(decoder_only.keys().all(|k| k.starts_with("decoder_")));
    assert!(!decoder_only.contains("encoder_W"));

    let template = dec.kind.init_params(&dec, &mut StdRng::seed_from_u64(0)).unwrap();
    assert!(missing_keys(&decoder_only, template.keys()).is_empty());
    assert_eq!(missing_keys(&WeightSet::new(), template.keys()).len(), template.len());
}

#[test]
fn checkpoint_reload_gives_identical_decoder_output() {
    let (dec, ws) = decoder_and_encoder();
    let path = temp_path("decoder.ckpt");
    ws.save(&path).unwrap();
    let reloaded = WeightSet::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let layer = ConditionalGru::from_config(&dec).unwrap();
    let x = Array::from_shape_fn((3, 2, 4), |(t, b, i)| (t + b + i) as f32 * 0.1);
    let cc = Array::from_shape_fn((4, 2, 6), |(s, b, c)| ((s * b + c) as f32).sin());

    let a = layer.forward(&ws, x.view().into_dyn(), cc.view().into_dyn(), None, None, None).unwrap();
    let b = layer.forward(&reloaded, x.view().into_dyn(), cc.view().into_dyn(), None, None, None).unwrap();
    assert_eq!(a.hidden, b.hidden);
    assert_eq!(a.alphas, b.alphas);
}
