//! End-to-end progress scenarios through the wired services

use lexis_common::{
    DbLocation, DisciplineProgress, LearningDb, LessonUpdate, ManualClock, ModuleProgress,
    NewDiscipline, NewLesson, NewModule, NewUser, Services, TtlCache, XpRewards,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct Catalog {
    user_id: i64,
    discipline_id: i64,
    module_id: i64,
    lessons: Vec<i64>,
}

async fn seed(services: &Services, email: &str) -> Catalog {
    let user = services
        .content
        .create_user(NewUser {
            email: email.to_string(),
            full_name: Some("Test Student".to_string()),
        })
        .await
        .unwrap();
    let discipline = services
        .content
        .create_discipline(NewDiscipline {
            title: format!("Civil Law for {}", email),
            description: None,
        })
        .await
        .unwrap();
    let module = services
        .content
        .create_module(NewModule {
            discipline_id: discipline.id,
            title: "Contracts".to_string(),
            description: None,
            order: 0,
        })
        .await
        .unwrap();

    let mut lessons = Vec::new();
    for (order, title) in ["Offer", "Acceptance"].iter().enumerate() {
        let lesson = services
            .content
            .create_lesson(NewLesson {
                module_id: module.id,
                title: title.to_string(),
                order: order as i64,
            })
            .await
            .unwrap();
        lessons.push(lesson.id);
    }

    Catalog {
        user_id: user.id,
        discipline_id: discipline.id,
        module_id: module.id,
        lessons,
    }
}

async fn on_disk_services() -> (Services, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let db = LearningDb::open(DbLocation::Custom(dir.path().join("lexis.db")))
        .await
        .unwrap();
    (Services::with_db(db, &Default::default()), dir)
}

#[tokio::test]
async fn test_module_progress_follows_completions() {
    let (services, _dir) = on_disk_services().await;
    let c = seed(&services, "ana@example.com").await;

    assert_eq!(
        services.progress.module_progress(c.user_id, c.module_id).await,
        ModuleProgress {
            completed_lessons: 0,
            total_lessons: 2,
            percent: 0
        }
    );

    services
        .xp
        .complete_lesson(c.user_id, c.lessons[0])
        .await
        .unwrap();
    assert_eq!(
        services.progress.module_progress(c.user_id, c.module_id).await,
        ModuleProgress {
            completed_lessons: 1,
            total_lessons: 2,
            percent: 50
        }
    );

    services
        .xp
        .complete_lesson(c.user_id, c.lessons[1])
        .await
        .unwrap();
    assert_eq!(
        services.progress.module_progress(c.user_id, c.module_id).await,
        ModuleProgress {
            completed_lessons: 2,
            total_lessons: 2,
            percent: 100
        }
    );
}

#[tokio::test]
async fn test_discipline_progress_scenario() {
    let (services, _dir) = on_disk_services().await;
    let c = seed(&services, "ana@example.com").await;

    let before = services
        .progress
        .discipline_progress(c.user_id, c.discipline_id)
        .await;
    assert_eq!(
        before,
        DisciplineProgress {
            completed_modules: 0,
            total_modules: 1,
            total_lessons: 2,
            completed_lessons: 0,
            percent: 0,
        }
    );

    for lesson_id in &c.lessons {
        services
            .xp
            .complete_lesson(c.user_id, *lesson_id)
            .await
            .unwrap();
    }

    let after = services
        .progress
        .discipline_progress(c.user_id, c.discipline_id)
        .await;
    assert_eq!(after.completed_modules, 1);
    assert_eq!(after.total_modules, 1);
    assert_eq!(after.percent, 100);
    assert_eq!(after.completed_lessons, 2);
}

#[tokio::test]
async fn test_lesson_completed_expires_after_ttl() {
    let db = Arc::new(LearningDb::open(DbLocation::InMemory).await.unwrap());
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(TtlCache::with_clock(
        Duration::from_secs(300),
        1000,
        clock.clone(),
    ));
    let services = Services::with_parts(db, cache, XpRewards::default());
    let c = seed(&services, "ana@example.com").await;

    assert!(!services
        .progress
        .lesson_completed(c.user_id, c.lessons[0])
        .await
        .unwrap());

    // Write behind the awarder's back so no event evicts the entry
    let (user_id, lesson_id) = (c.user_id, c.lessons[0]);
    services
        .db
        .execute(move |conn| {
            conn.execute(
                "INSERT INTO user_lesson_progress (user_id, lesson_id, attempts, completed_at)
                 VALUES (?1, ?2, 1, '2024-01-01 00:00:00+00:00')",
                rusqlite::params![user_id, lesson_id],
            )?;
            Ok(())
        })
        .await
        .unwrap();

    clock.advance(Duration::from_secs(300));
    assert!(!services
        .progress
        .lesson_completed(c.user_id, c.lessons[0])
        .await
        .unwrap());

    clock.advance(Duration::from_secs(1));
    assert!(services
        .progress
        .lesson_completed(c.user_id, c.lessons[0])
        .await
        .unwrap());
}

#[tokio::test]
async fn test_completion_evicts_other_users_entries() {
    let (services, _dir) = on_disk_services().await;
    let ana = seed(&services, "ana@example.com").await;
    let ben = seed(&services, "ben@example.com").await;

    services
        .progress
        .module_progress(ben.user_id, ben.module_id)
        .await;
    services
        .progress
        .lesson_completed(ben.user_id, ben.lessons[0])
        .await
        .unwrap();
    services.stats.user_stats(ben.user_id).await.unwrap();
    assert_eq!(services.cache.len(), 3);

    services
        .xp
        .complete_lesson(ana.user_id, ana.lessons[0])
        .await
        .unwrap();

    // Invalidation is coarse: Ben's entries go too, and his numbers stay right
    assert!(services.cache.is_empty());
    assert_eq!(
        services
            .progress
            .module_progress(ben.user_id, ben.module_id)
            .await
            .completed_lessons,
        0
    );
}

#[tokio::test]
async fn test_catalog_view_reflects_completion() {
    let (services, _dir) = on_disk_services().await;
    let c = seed(&services, "ana@example.com").await;

    let view = services
        .catalog
        .discipline_view(c.discipline_id, Some(c.user_id))
        .await
        .unwrap();
    assert_eq!(view.modules[0].lessons[0].is_completed_by_user, Some(false));

    services
        .xp
        .complete_lesson(c.user_id, c.lessons[0])
        .await
        .unwrap();

    let view = services
        .catalog
        .discipline_view(c.discipline_id, Some(c.user_id))
        .await
        .unwrap();
    assert_eq!(view.modules[0].lessons[0].is_completed_by_user, Some(true));
    assert_eq!(view.modules[0].lessons[1].is_completed_by_user, Some(false));
    assert_eq!(view.modules[0].progress.unwrap().percent, 50);
}

#[tokio::test]
async fn test_deleting_a_lesson_refreshes_cached_progress() {
    let (services, _dir) = on_disk_services().await;
    let c = seed(&services, "ana@example.com").await;

    services
        .xp
        .complete_lesson(c.user_id, c.lessons[0])
        .await
        .unwrap();
    assert_eq!(
        services.progress.module_progress(c.user_id, c.module_id).await,
        ModuleProgress {
            completed_lessons: 1,
            total_lessons: 2,
            percent: 50
        }
    );
    assert_eq!(
        services
            .progress
            .discipline_progress(c.user_id, c.discipline_id)
            .await
            .percent,
        0
    );
    assert_eq!(services.stats.user_stats(c.user_id).await.unwrap().total_lessons, 2);

    services.content.delete_lesson(c.lessons[1]).await.unwrap();

    assert_eq!(
        services.progress.module_progress(c.user_id, c.module_id).await,
        ModuleProgress {
            completed_lessons: 1,
            total_lessons: 1,
            percent: 100
        }
    );
    let discipline = services
        .progress
        .discipline_progress(c.user_id, c.discipline_id)
        .await;
    assert_eq!(discipline.completed_modules, 1);
    assert_eq!(discipline.percent, 100);
    assert_eq!(services.stats.user_stats(c.user_id).await.unwrap().total_lessons, 1);
}

#[tokio::test]
async fn test_adding_or_moving_lessons_refreshes_cached_progress() {
    let (services, _dir) = on_disk_services().await;
    let c = seed(&services, "ana@example.com").await;

    for lesson_id in &c.lessons {
        services
            .xp
            .complete_lesson(c.user_id, *lesson_id)
            .await
            .unwrap();
    }
    assert_eq!(
        services
            .progress
            .discipline_progress(c.user_id, c.discipline_id)
            .await
            .percent,
        100
    );

    let extra = services
        .content
        .create_lesson(NewLesson {
            module_id: c.module_id,
            title: "Consideration".to_string(),
            order: 2,
        })
        .await
        .unwrap();
    assert_eq!(
        services.progress.module_progress(c.user_id, c.module_id).await,
        ModuleProgress {
            completed_lessons: 2,
            total_lessons: 3,
            percent: 66
        }
    );
    assert_eq!(
        services
            .progress
            .discipline_progress(c.user_id, c.discipline_id)
            .await
            .completed_modules,
        0
    );

    // Moving the new lesson out completes the module again
    let remedies = services
        .content
        .create_module(NewModule {
            discipline_id: c.discipline_id,
            title: "Remedies".to_string(),
            description: None,
            order: 1,
        })
        .await
        .unwrap();
    services
        .content
        .update_lesson(
            extra.id,
            LessonUpdate {
                module_id: Some(remedies.id),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        services.progress.module_progress(c.user_id, c.module_id).await,
        ModuleProgress {
            completed_lessons: 2,
            total_lessons: 2,
            percent: 100
        }
    );
    let discipline = services
        .progress
        .discipline_progress(c.user_id, c.discipline_id)
        .await;
    assert_eq!(discipline.completed_modules, 1);
    assert_eq!(discipline.total_modules, 2);
    assert_eq!(discipline.percent, 50);
}
