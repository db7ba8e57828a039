//! Candidate page elements as published by the page.

use serde::{Deserialize, Serialize};

use crate::focus::{FocusTarget, Rect, VisualState};

#[derive(Debug, Clone, Deserialize)]
pub struct ElementSpec {
    pub id: String,
    pub tag: String,
    pub rect: Rect,
    #[serde(default)]
    pub stacking: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageElement {
    pub id: String,
    pub tag: String,
    pub rect: Rect,
    pub stacking: i32,
    pub state: VisualState,
}

impl From<ElementSpec> for PageElement {
    fn from(s: ElementSpec) -> Self {
        Self {
            id: s.id,
            tag: s.tag.to_ascii_lowercase(),
            rect: s.rect,
            stacking: s.stacking,
            state: VisualState::default(),
        }
    }
}

impl FocusTarget for PageElement {
    fn id(&self) -> &str {
        &self.id
    }
    fn bounding_box(&self) -> Rect {
        self.rect
    }
    fn stacking(&self) -> i32 {
        self.stacking
    }
    fn apply_visual_state(&mut self, state: &VisualState) {
        self.state = state.clone();
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    elements: Vec<PageElement>,
    /// Styled elements that left the layout, with the reset the page still has to apply.
    released: Vec<(String, VisualState)>,
}

impl Scene {
    /// Replaces the candidate set, keeping only elements whose tag is listed.
    /// Elements whose id survives keep their visual state. Returns how many
    /// were kept.
    pub fn replace(&mut self, specs: Vec<ElementSpec>, tags: &[String]) -> usize {
        let previous = std::mem::take(&mut self.elements);
        self.elements = specs
            .into_iter()
            .map(PageElement::from)
            .filter(|e| tags.iter().any(|t| t.eq_ignore_ascii_case(&e.tag)))
            .collect();
        self.released.retain(|(id, _)| !self.elements.iter().any(|e| e.id == *id));

        for prev in previous {
            match self.elements.iter_mut().find(|e| e.id == prev.id) {
                Some(el) => el.state = prev.state,
                None if prev.state.transition_ms > 0 => {
                    let resting = VisualState::resting(prev.state.transition_ms);
                    self.released.push((prev.id, resting));
                }
                None => {}
            }
        }
        self.elements.len()
    }

    pub fn elements(&self) -> &[PageElement] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut [PageElement] {
        &mut self.elements
    }

    /// Elements that have been styled at least once, with their declarations,
    /// followed by resets for styled elements that left the layout.
    pub fn styles(&self) -> serde_json::Value {
        let styled: Vec<_> = self
            .elements
            .iter()
            .filter(|e| e.state.transition_ms > 0)
            .map(|e| style_entry(&e.id, &e.state))
            .chain(self.released.iter().map(|(id, st)| style_entry(id, st)))
            .collect();
        serde_json::Value::Array(styled)
    }

    /// Forgets the resets of departed elements once they were reported.
    pub fn clear_released(&mut self) {
        self.released.clear();
    }
}

fn style_entry(id: &str, state: &VisualState) -> serde_json::Value {
    let css: serde_json::Map<String, serde_json::Value> = state
        .css()
        .into_iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v)))
        .collect();
    serde_json::json!({"id": id, "enlarged": state.is_enlarged(), "style": css})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: &str, tag: &str) -> ElementSpec {
        ElementSpec {
            id: id.into(),
            tag: tag.into(),
            rect: Rect::new(0.0, 0.0, 10.0, 10.0),
            stacking: 0,
        }
    }

    #[test]
    fn keeps_only_candidate_tags() {
        let tags: Vec<String> = ["img", "p", "h1"].iter().map(|s| s.to_string()).collect();
        let mut scene = Scene::default();
        let kept = scene.replace(
            vec![spec("a", "IMG"), spec("b", "div"), spec("c", "p"), spec("d", "button")],
            &tags,
        );
        assert_eq!(kept, 2);
        let ids: Vec<_> = scene.elements().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn layout_json_parses_with_default_stacking() {
        let v: Vec<ElementSpec> = serde_json::from_str(
            r#"[{"id":"hero","tag":"h1","rect":{"left":0,"top":0,"width":800,"height":60}}]"#,
        )
        .expect("parse");
        assert_eq!(v[0].stacking, 0);
        assert_eq!(v[0].rect.width, 800.0);
    }

    #[test]
    fn unstyled_elements_are_not_reported() {
        let tags = vec!["p".to_string()];
        let mut scene = Scene::default();
        scene.replace(vec![spec("a", "p"), spec("b", "p")], &tags);
        scene.elements_mut()[1].apply_visual_state(&VisualState::resting(200));
        let styles = scene.styles();
        let arr = styles.as_array().expect("array");
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["id"], "b");
        assert_eq!(arr[0]["style"]["transform"], "scale(1)");
    }

    #[test]
    fn relayout_keeps_state_of_surviving_elements() {
        let tags = vec!["p".to_string()];
        let mut scene = Scene::default();
        scene.replace(vec![spec("a", "p"), spec("b", "p")], &tags);
        let big = VisualState {
            scale: 1.5,
            transition_ms: 200,
            ..VisualState::default()
        };
        scene.elements_mut()[0].apply_visual_state(&big);

        scene.replace(vec![spec("b", "p"), spec("a", "p")], &tags);
        assert_eq!(scene.elements()[1].id, "a");
        assert!(scene.elements()[1].state.is_enlarged());
        assert!(!scene.elements()[0].state.is_enlarged());
    }

    #[test]
    fn departed_element_reports_a_reset_once() {
        let tags = vec!["p".to_string()];
        let mut scene = Scene::default();
        scene.replace(vec![spec("a", "p"), spec("b", "p")], &tags);
        scene.elements_mut()[0].apply_visual_state(&VisualState {
            scale: 1.5,
            z_index: Some(10),
            transition_ms: 200,
            ..VisualState::default()
        });

        scene.replace(vec![spec("b", "p")], &tags);
        let styles = scene.styles();
        let arr = styles.as_array().expect("array");
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["id"], "a");
        assert_eq!(arr[0]["enlarged"], false);
        assert_eq!(arr[0]["style"]["transform"], "scale(1)");

        scene.clear_released();
        assert!(scene.styles().as_array().expect("array").is_empty());
    }

    #[test]
    fn returning_element_is_no_longer_released() {
        let tags = vec!["p".to_string()];
        let mut scene = Scene::default();
        scene.replace(vec![spec("a", "p")], &tags);
        scene.elements_mut()[0].apply_visual_state(&VisualState::resting(200));
        scene.replace(vec![], &tags);
        scene.replace(vec![spec("a", "p")], &tags);
        let styles = scene.styles();
        assert!(styles.as_array().expect("array").is_empty());
    }
}
