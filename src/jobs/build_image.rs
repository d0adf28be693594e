// src/jobs/build_image.rs

//! Build one image

use super::{JobIdentity, shell_quote};
use crate::api::Endpoint;
use crate::backend::Task;
use crate::db::models::{Image, ImageStatus};
use crate::error::Result;
use crate::farm::BuildFarm;
use crate::repo::RepoKind;
use rusqlite::Connection;

pub fn run(farm: &BuildFarm, conn: &Connection, image: &mut Image) -> Result<i64> {
    let mirror_final = super::repo_url(farm, RepoKind::Final, &image.branch, None);
    let prefix = format!("{}-{}-{}", image.branch, image.device, image.ui);

    let tasks = vec![
        Task::new(
            "img_prepare",
            format!(
                r#"
            pmbootstrap config device {}
            pmbootstrap config ui {}
            pmbootstrap config extra_packages none
            "#,
                shell_quote(&image.device),
                shell_quote(&image.ui)
            ),
        ),
        Task::new(
            "install",
            format!(
                r#"
            pmbootstrap \
                -mp {} \
                --aports="$PWD/pmaports" \
                --details-to-stdout \
                install \
                --no-sparse \
                --password 147147
            "#,
                shell_quote(&mirror_final)
            ),
        ),
        Task::new(
            "export",
            format!(
                r#"
            dir_name="$(date -u +%Y%m%d-%H%M)"
            echo "$dir_name" > dir_name
            mkdir -p out
            work="$(pmbootstrap -q config work)"
            sudo cp "$work/chroot_native/home/pmos/rootfs/"*.img \
                "out/$dir_name-{}.img"
            sudo chown -R "$(id -u)" out
            xz -0 -T0 out/*.img
            cd out
            for f in *; do
                sha256sum "$f" > "$f.sha256"
            done
            "#,
                prefix
            ),
        ),
        super::callback_task(
            farm,
            Endpoint::BuildImage,
            &[
                ("Branch", shell_quote(&image.branch)),
                ("Device", shell_quote(&image.device)),
                ("Ui", shell_quote(&image.ui)),
                ("Version", "\"$(cat dir_name)\"".to_string()),
            ],
            "out/*",
        ),
    ];

    let note = format!("Build image: `{}/{}:{}`", image.branch, image.device, image.ui);
    let identity = JobIdentity {
        device: Some(image.device.clone()),
        ui: Some(image.ui.clone()),
        retry_count: Some(image.retry_count),
        ..JobIdentity::new(&image.branch)
    };
    let job_id = super::run(farm, conn, "build_image", &note, tasks, &identity)?;

    if image.status == ImageStatus::Failed {
        image.increment_retry_count(conn)?;
    }
    image.set_status_and_job(conn, ImageStatus::Building, Some(job_id))?;
    Ok(job_id)
}
