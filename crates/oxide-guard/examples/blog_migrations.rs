//! Example: Blog Application Migrations
//!
//! This example builds the schema changes of a blog application in Rust,
//! runs them through the validator and prints the PostgreSQL output of the
//! safe ones alongside the violations of the unsafe ones.
//!
//! Run with: cargo run --example blog_migrations -p oxide-guard

use oxide_guard::prelude::*;

fn create_posts() -> Migration {
    Migration::new("0001_create_posts")
        .up(|m| {
            m.create_table(
                "posts",
                vec![
                    ColumnDefinition::new("id", "bigint").primary_key(),
                    ColumnDefinition::new("title", "string(200)").not_null(),
                    ColumnDefinition::new("body", "text"),
                    ColumnDefinition::new("created_at", "timestamptz")
                        .not_null()
                        .default(DefaultValue::expression("now()")),
                ],
            )
        })
        .down(|m| m.drop_table("posts"))
}

fn add_author() -> Migration {
    Migration::new("0002_add_author_to_posts")
        .up(|m| m.add_reference("posts", "author", ReferenceOptions::default()))
        .down(|m| m.remove_reference("posts", "author", false))
}

fn index_author() -> Migration {
    Migration::new("0003_index_posts_author")
        .up(|m| m.add_index("posts", "author_id", IndexOptions::default()))
        .down(|m| m.remove_index("posts", RemoveIndexOptions::by_column("author_id")))
}

fn author_foreign_key() -> Migration {
    Migration::new("0004_posts_author_fk")
        .up(|m| {
            m.add_foreign_key(
                "posts",
                "authors",
                ForeignKeyOptions {
                    on_delete: Some(ForeignKeyAction::Cascade),
                    ..ForeignKeyOptions::default()
                },
            )
        })
        .down(|m| m.remove_foreign_key("posts", "fk_posts_authors"))
}

fn validate_author_foreign_key() -> Migration {
    Migration::new("0005_validate_posts_author_fk")
        .up(|m| m.validate_foreign_key("posts", "fk_posts_authors"))
        .down(|_| Ok(()))
}

/// Two problems at once: a NOT NULL column without default, and an index
/// build sharing its direction with other DDL.
fn unsafe_slug() -> Migration {
    Migration::new("0006_add_slug_to_posts")
        .up(|m| {
            m.add_column("posts", "slug", "string", ColumnOptions::default().not_null())?;
            m.add_index("posts", "slug", IndexOptions::default().unique())
        })
        .down(|m| m.remove_column("posts", "slug"))
}

fn main() {
    println!("{}", "=".repeat(70));
    println!(" OXIDE-GUARD: Blog Application Example");
    println!("{}", "=".repeat(70));
    println!();

    let validator = Validator::default();
    let renderer = PostgresRenderer::new();
    let migrations = vec![
        create_posts(),
        add_author(),
        index_author(),
        author_foreign_key(),
        validate_author_foreign_key(),
        unsafe_slug(),
    ];

    for migration in &migrations {
        println!("{}", "-".repeat(70));
        match validator
            .validated(migration)
            .and_then(|validated| renderer.render(&validated))
        {
            Ok(sql) => println!("{sql}"),
            Err(error) => println!("REJECTED {error}\n"),
        }
    }
}
