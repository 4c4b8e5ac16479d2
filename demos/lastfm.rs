//! Fit an ALS model on the Last.fm listening data and print the top
//! artists for one user.
//!
//! Usage:
//!
//! ```text
//! cargo run --example lastfm -- user_artists.dat artists.dat [user_id]
//! ```
use failure::{format_err, Error};

use implicit_als::datasets::{load_catalog, load_interactions};
use implicit_als::models::als::Hyperparameters;
use implicit_als::RankingModel;

fn main() -> Result<(), Error> {
    let args: Vec<String> = std::env::args().collect();

    let interactions_path = args
        .get(1)
        .ok_or_else(|| format_err!("missing interactions file argument"))?;
    let catalog_path = args
        .get(2)
        .ok_or_else(|| format_err!("missing catalog file argument"))?;
    let user_id: usize = match args.get(3) {
        Some(value) => value.parse()?,
        None => 2,
    };

    let interactions = load_interactions(interactions_path)?;
    let catalog = load_catalog(catalog_path)?;
    let matrix = interactions.to_sparse()?;

    println!(
        "Loaded {} interactions ({} users, {} items)",
        matrix.nnz(),
        matrix.num_users(),
        matrix.num_items()
    );

    let mut model = Hyperparameters::new(50)
        .regularization(0.01)
        .num_iterations(15)
        .seed(42)
        .build();

    let outcome = model.fit(&matrix)?;
    println!("Training finished: {:?}", outcome);

    let recommendations = model.recommend(user_id, &matrix, 5)?;

    for (name, score) in catalog.resolve(&recommendations)? {
        println!("{}: {:.4}", name, score);
    }

    Ok(())
}
