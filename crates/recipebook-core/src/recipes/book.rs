use tracing::debug;

use crate::models::Recipe;

/// In-memory recipe list. Recipe ids are positions in the list.
#[derive(Debug, Clone, Default)]
pub struct RecipeBook {
    recipes: Vec<Recipe>,
}

impl RecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recipes(&self) -> &[Recipe] {
        &self.recipes
    }

    pub fn get(&self, id: usize) -> Option<&Recipe> {
        self.recipes.get(id)
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Append a recipe and return its id
    pub fn add(&mut self, recipe: Recipe) -> usize {
        debug!(name = %recipe.name, "Recipe added");
        self.recipes.push(recipe);
        self.recipes.len() - 1
    }

    /// Replace the recipe at `id`. Returns false if there is none.
    pub fn update(&mut self, id: usize, recipe: Recipe) -> bool {
        match self.recipes.get_mut(id) {
            Some(slot) => {
                debug!(id, name = %recipe.name, "Recipe updated");
                *slot = recipe;
                true
            }
            None => false,
        }
    }

    /// Remove the recipe at `id`; later recipes move down one position.
    pub fn delete(&mut self, id: usize) -> Option<Recipe> {
        if id < self.recipes.len() {
            Some(self.recipes.remove(id))
        } else {
            None
        }
    }

    pub fn set_recipes(&mut self, recipes: Vec<Recipe>) {
        self.recipes = recipes;
    }
}
