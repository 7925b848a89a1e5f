//! Recipe and ingredient models.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub amount: u32,
}

impl Ingredient {
    pub fn new(name: impl Into<String>, amount: u32) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub description: String,
    #[serde(rename = "imagePath")]
    pub image_path: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
}

impl Recipe {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        image_path: impl Into<String>,
        ingredients: Vec<Ingredient>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            image_path: image_path.into(),
            ingredients,
        }
    }

    /// One-line ingredient summary, e.g. "2 Buns, 1 Meat"
    pub fn ingredient_summary(&self) -> String {
        self.ingredients
            .iter()
            .map(|i| format!("{} {}", i.amount, i.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_json_field_names() {
        let json = r#"{"name":"Burger","description":"Big","imagePath":"http://img/b.png","ingredients":[{"name":"Buns","amount":2}]}"#;
        let recipe: Recipe = serde_json::from_str(json).expect("Failed to parse recipe test JSON");
        assert_eq!(recipe.image_path, "http://img/b.png");
        assert_eq!(recipe.ingredients, vec![Ingredient::new("Buns", 2)]);

        // Recipes saved without ingredients
        let json = r#"{"name":"Toast","description":"Crisp","imagePath":"t.png"}"#;
        let recipe: Recipe = serde_json::from_str(json).expect("Failed to parse recipe test JSON");
        assert!(recipe.ingredients.is_empty());
    }

    #[test]
    fn test_ingredient_summary() {
        let recipe = Recipe::new(
            "Burger",
            "Big",
            "b.png",
            vec![Ingredient::new("Buns", 2), Ingredient::new("Meat", 1)],
        );
        assert_eq!(recipe.ingredient_summary(), "2 Buns, 1 Meat");
    }
}
