use drops_core::{
    diff_delete, diff_droplets, diff_volumes, translate_droplet, Action, DesiredCompute,
    DesiredVolume, ObservedCompute, ObservedVolume, ResourceId, ValidationError, VolumeNameIndex,
    VolumeRef,
};

fn observed(id: u64, name: &str, size: &str, image: &str) -> ObservedCompute {
    ObservedCompute {
        id,
        name: name.to_string(),
        size_slug: Some(size.to_string()),
        image_slug: Some(image.to_string()),
        volume_ids: vec![],
    }
}

fn desired(name: &str, size: &str, image: &str) -> DesiredCompute {
    DesiredCompute {
        name: name.to_string(),
        region: "nyc3".to_string(),
        size: size.to_string(),
        image: image.to_string(),
        ..Default::default()
    }
}

fn names<T, F: Fn(&T) -> &str>(items: &[T], f: F) -> Vec<String> {
    items.iter().map(|i| f(i).to_string()).collect()
}

#[test]
fn test_resize_and_create_scenario() {
    let have = vec![observed(1, "web-1", "s-1vcpu-1gb", "ubuntu")];
    let want = vec![
        desired("web-1", "s-1vcpu-2gb", "ubuntu"),
        desired("web-2", "s-1vcpu-1gb", "ubuntu"),
    ];

    let out = diff_droplets(&want, &have, &VolumeNameIndex::default());
    assert_eq!(names(&out.create, |d| d.name.as_str()), vec!["web-2"]);
    assert_eq!(out.updates.len(), 1);
    assert_eq!(
        out.updates.get(&ResourceId::Droplet(1)),
        Some(&[Action::ResizeDroplet { size: "s-1vcpu-2gb".to_string() }][..])
    );
    assert!(diff_delete(&want, &have).is_empty());
}

#[test]
fn test_create_and_delete_are_complements() {
    let have = vec![
        observed(1, "droplet-1", "s", "u"),
        observed(2, "droplet-2", "s", "u"),
        observed(3, "droplet-3", "s", "u"),
    ];
    let want = vec![
        desired("droplet-3", "s", "u"),
        desired("droplet-4", "s", "u"),
        desired("droplet-5", "s", "u"),
    ];

    let out = diff_droplets(&want, &have, &VolumeNameIndex::default());
    assert_eq!(names(&out.create, |d| d.name.as_str()), vec!["droplet-4", "droplet-5"]);
    assert!(out.updates.is_empty());
    let deleted = diff_delete(&want, &have);
    assert_eq!(names(&deleted, |o| o.name.as_str()), vec!["droplet-1", "droplet-2"]);
}

#[test]
fn test_empty_observed_creates_everything() {
    let want = vec![desired("a", "s", "u"), desired("b", "s", "u")];
    let out = diff_droplets(&want, &[], &VolumeNameIndex::default());
    assert_eq!(out.create.len(), 2);
    assert!(diff_delete(&want, &Vec::<ObservedCompute>::new()).is_empty());
}

#[test]
fn test_in_sync_inventory_is_a_no_op() {
    let have_droplets = vec![observed(1, "web-1", "s-1vcpu-1gb", "ubuntu")];
    let want_droplets = vec![desired("web-1", "s-1vcpu-1gb", "ubuntu")];
    let have_volumes = vec![ObservedVolume {
        id: "vol-1".to_string(),
        name: "data".to_string(),
        region: "nyc3".to_string(),
        size_gigabytes: 100,
    }];
    let want_volumes = vec![DesiredVolume {
        name: "data".to_string(),
        region: "nyc3".to_string(),
        size_gigabytes: 100,
        ..Default::default()
    }];

    let index = VolumeNameIndex::from_volumes(&have_volumes);
    let droplets = diff_droplets(&want_droplets, &have_droplets, &index);
    assert!(droplets.create.is_empty());
    assert!(droplets.updates.is_empty());
    assert!(diff_delete(&want_droplets, &have_droplets).is_empty());

    let volumes = diff_volumes(&want_volumes, &have_volumes);
    assert!(volumes.create.is_empty());
    assert!(volumes.updates.is_empty());
    assert!(diff_delete(&want_volumes, &have_volumes).is_empty());
}

#[test]
fn test_attachment_changes_touch_only_the_difference() {
    let mut have = observed(9, "db", "s", "u");
    have.volume_ids = vec!["A".to_string(), "B".to_string()];
    let mut want = desired("db", "s", "u");
    want.volumes = vec!["vol-b".to_string(), "vol-c".to_string()];
    let index: VolumeNameIndex = [
        ("vol-a".to_string(), "A".to_string()),
        ("vol-b".to_string(), "B".to_string()),
        ("vol-c".to_string(), "C".to_string()),
    ]
    .into_iter()
    .collect();

    let out = diff_droplets(&[want], &[have], &index);
    let actions = out.updates.get(&ResourceId::Droplet(9)).unwrap();
    assert_eq!(
        actions,
        &[
            Action::Detach { volume_id: "A".to_string() },
            Action::Attach {
                volume: VolumeRef {
                    name: "vol-c".to_string(),
                    id: Some("C".to_string())
                }
            },
        ]
    );
}

#[test]
fn test_missing_image_fails_translation() {
    let want = desired("web-3", "s-1vcpu-1gb", "");
    let err = translate_droplet(&want, &VolumeNameIndex::default()).unwrap_err();
    assert!(matches!(err, ValidationError::MissingField { field: "image", .. }));
}
