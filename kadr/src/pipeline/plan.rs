use crate::models::{
    AttemptConfiguration, LanguageCatalog, PlanKind, Rotation, Script, ScriptHypothesis,
};

/// Ordered attempt queue for one image.
///
/// 1. primary script, image as is
/// 2. primary script turned 180°, when the rotation guess was below `orientation_threshold`
/// 3. each secondary script, in hypothesis order
/// 4. every installed language of every allowed script together
///
/// Scripts are resolved to their nearest installed script first. Entries that would
/// repeat an earlier engine request are dropped. The result depends only on the inputs.
pub fn build_queue(
    hypothesis: &ScriptHypothesis,
    catalog: &LanguageCatalog,
    orientation_threshold: f32,
) -> Vec<AttemptConfiguration> {
    let mut queue: Vec<AttemptConfiguration> = Vec::new();
    let mut push = |configuration: AttemptConfiguration| {
        if configuration.languages.is_empty()
            || queue.iter().any(|queued| queued.same_request(&configuration))
        {
            return;
        }
        queue.push(configuration);
    };

    let primary = resolve(hypothesis.primary().script, catalog);
    push(scripted(PlanKind::Primary, primary, Rotation::None, catalog));

    if hypothesis.rotation_confidence < orientation_threshold {
        push(scripted(
            PlanKind::PrimaryRotated,
            primary,
            Rotation::UpsideDown,
            catalog,
        ));
    }

    for score in hypothesis.secondary() {
        let script = resolve(score.script, catalog);
        push(scripted(PlanKind::Secondary, script, Rotation::None, catalog));
    }

    push(AttemptConfiguration {
        kind: PlanKind::Combined,
        languages: catalog.combined_languages(),
        script: None,
        rotation: Rotation::None,
    });

    queue
}

fn resolve(script: Script, catalog: &LanguageCatalog) -> Script {
    catalog.nearest_installed(script).unwrap_or(match script {
        Script::Unknown => Script::Latin,
        other => other,
    })
}

fn scripted(
    kind: PlanKind,
    script: Script,
    rotation: Rotation,
    catalog: &LanguageCatalog,
) -> AttemptConfiguration {
    AttemptConfiguration {
        kind,
        languages: catalog.languages_for(script),
        script: Some(script),
        rotation,
    }
}
